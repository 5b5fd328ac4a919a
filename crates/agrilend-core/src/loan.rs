use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LendingError, LendingResult};
use crate::types::{FarmerId, LoanId, Money, Msisdn, ProductId};

/// Loan lifecycle states.
///
/// `Pending -> Approved -> Disbursed -> Active/Overdue -> Paid` is the happy
/// path; `Rejected` and `Defaulted` are the administrative exits. `Paid`,
/// `Defaulted` and `Rejected` are terminal: the aggregate is frozen once
/// reached and retained as the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    Pending,
    Approved,
    Disbursed,
    Active,
    Overdue,
    Paid,
    Defaulted,
    Rejected,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Defaulted | Self::Rejected)
    }

    /// States that block a new application outright ("farmer already has an
    /// active loan"). Overdue loans pass this check but still count toward
    /// the exposure cap below.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Approved | Self::Disbursed | Self::Active
        )
    }

    /// States in which money is out with the borrower, for the aggregate
    /// exposure cap.
    pub fn is_outstanding_exposure(&self) -> bool {
        matches!(self, Self::Disbursed | Self::Active | Self::Overdue)
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Disbursed => "DISBURSED",
            Self::Active => "ACTIVE",
            Self::Overdue => "OVERDUE",
            Self::Paid => "PAID",
            Self::Defaulted => "DEFAULTED",
            Self::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

/// A loan issued to a farmer.
///
/// Invariants: `amount_approved` is set iff status has passed `Approved`;
/// `due_date` and `disbursement_date` are set iff status has passed
/// `Disbursed`. All mutation goes through the transition methods below,
/// executed by the ledger while holding the loan's exclusive lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub farmer_id: FarmerId,
    pub product_id: ProductId,
    /// Borrower's mobile-money account: disbursement destination and
    /// collection/notification target.
    pub phone: Msisdn,
    pub amount_requested: Money,
    pub amount_approved: Option<Money>,
    pub status: LoanStatus,
    pub application_date: DateTime<Utc>,
    pub approval_date: Option<DateTime<Utc>>,
    pub disbursement_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    /// Opaque 0-100 score from the credit scorer, captured at application.
    pub credit_score: Option<u8>,
    /// Reference of the most recent gateway disbursement attempt.
    pub gateway_reference: Option<String>,
    pub rejection_reason: Option<String>,
}

impl Loan {
    pub fn new(
        farmer_id: FarmerId,
        product_id: ProductId,
        phone: Msisdn,
        amount_requested: Money,
        credit_score: Option<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LoanId::new(),
            farmer_id,
            product_id,
            phone,
            amount_requested,
            amount_approved: None,
            status: LoanStatus::Pending,
            application_date: now,
            approval_date: None,
            disbursement_date: None,
            due_date: None,
            credit_score,
            gateway_reference: None,
            rejection_reason: None,
        }
    }

    fn require_status(&self, expected: LoanStatus, to: LoanStatus) -> LendingResult<()> {
        if self.status != expected {
            return Err(LendingError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// PENDING -> APPROVED. The approved amount defaults to the requested one.
    pub fn approve(&mut self, amount: Option<Money>, now: DateTime<Utc>) -> LendingResult<()> {
        self.require_status(LoanStatus::Pending, LoanStatus::Approved)?;
        self.amount_approved = Some(amount.unwrap_or(self.amount_requested));
        self.approval_date = Some(now);
        self.status = LoanStatus::Approved;
        Ok(())
    }

    /// PENDING -> REJECTED with a caller-visible reason.
    pub fn reject(&mut self, reason: impl Into<String>) -> LendingResult<()> {
        self.require_status(LoanStatus::Pending, LoanStatus::Rejected)?;
        self.rejection_reason = Some(reason.into());
        self.status = LoanStatus::Rejected;
        Ok(())
    }

    /// APPROVED -> DISBURSED, on a SUCCESSFUL disbursement transaction.
    ///
    /// Sets the disbursement date and derives the loan-level due date from
    /// the product duration.
    pub fn mark_disbursed(&mut self, duration_days: i64, now: DateTime<Utc>) -> LendingResult<()> {
        self.require_status(LoanStatus::Approved, LoanStatus::Disbursed)?;
        self.disbursement_date = Some(now);
        self.due_date = Some(now + Duration::days(duration_days));
        self.status = LoanStatus::Disbursed;
        Ok(())
    }

    /// Any non-terminal state -> DEFAULTED. Administrative action.
    pub fn mark_defaulted(&mut self) -> LendingResult<()> {
        if self.status.is_terminal() {
            return Err(LendingError::IllegalTransition {
                from: self.status,
                to: LoanStatus::Defaulted,
            });
        }
        self.status = LoanStatus::Defaulted;
        Ok(())
    }

    /// Idempotent status derivation for a disbursed loan.
    ///
    /// Given the current repaid total and whether any installment is past
    /// due, derives PAID vs OVERDUE vs ACTIVE. May be called any number of
    /// times; the only side effect is the status field. States outside
    /// {Disbursed, Active, Overdue} are left untouched.
    pub fn recompute_status(
        &mut self,
        total_repaid: Money,
        any_overdue: bool,
        now: DateTime<Utc>,
    ) {
        if !matches!(
            self.status,
            LoanStatus::Disbursed | LoanStatus::Active | LoanStatus::Overdue
        ) {
            return;
        }
        let approved = match self.amount_approved {
            Some(a) => a,
            None => return,
        };
        let past_due = self.due_date.map(|d| d < now).unwrap_or(false);
        if total_repaid >= approved {
            self.status = LoanStatus::Paid;
        } else if any_overdue || past_due {
            self.status = LoanStatus::Overdue;
        } else if total_repaid > Decimal::ZERO || self.status != LoanStatus::Disbursed {
            self.status = LoanStatus::Active;
        }
    }

    pub fn approved_amount(&self) -> LendingResult<Money> {
        self.amount_approved
            .ok_or_else(|| LendingError::validation("loan has no approved amount yet"))
    }

    /// Outstanding principal balance, floored at zero.
    pub fn balance(&self, total_repaid: Money) -> Money {
        let approved = self.amount_approved.unwrap_or(Decimal::ZERO);
        (approved - total_repaid).max(Decimal::ZERO)
    }
}
