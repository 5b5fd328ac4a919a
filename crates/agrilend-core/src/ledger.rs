use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::{LendingError, LendingResult};
use crate::loan::Loan;
use crate::notify::{messages, send_quietly, NotificationSink};
use crate::product::LoanProduct;
use crate::schedule::{build_custom_schedule, CustomEntry, Installment};
use crate::scoring::CreditScorer;
use crate::store::{LedgerStore, LoanLocks};
use crate::types::{Currency, FarmerId, LoanId, Money, Msisdn, ProductId};

/// Underwriting limits applied at application time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub minimum_credit_score: u8,
    /// Cap on a single farmer's total outstanding principal.
    pub maximum_exposure: Money,
    pub currency: Currency,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            minimum_credit_score: 50,
            maximum_exposure: dec!(10_000),
            currency: Currency::default(),
        }
    }
}

/// A farmer's request for credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplication {
    pub farmer_id: FarmerId,
    pub product_id: ProductId,
    pub phone: Msisdn,
    pub amount: Money,
}

/// The authoritative loan records and the state-machine transitions on
/// them. Every transition runs under the loan's exclusive lock so a
/// webhook-driven reconciliation and a user-initiated approval cannot race.
pub struct LoanLedger {
    store: Arc<dyn LedgerStore>,
    locks: Arc<LoanLocks>,
    scorer: Arc<dyn CreditScorer>,
    notifications: Arc<dyn NotificationSink>,
    risk: RiskConfig,
}

impl LoanLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        locks: Arc<LoanLocks>,
        scorer: Arc<dyn CreditScorer>,
        notifications: Arc<dyn NotificationSink>,
        risk: RiskConfig,
    ) -> Self {
        Self {
            store,
            locks,
            scorer,
            notifications,
            risk,
        }
    }

    /// Process a loan application.
    ///
    /// Eligibility failures reject synchronously with a specific reason: the
    /// application is persisted as a REJECTED loan (the audit trail keeps
    /// it) and the reason is surfaced as a `Validation` error. An eligible
    /// application is persisted PENDING.
    pub async fn apply(&self, application: LoanApplication) -> LendingResult<Loan> {
        let now = Utc::now();
        let product = self.store.product(application.product_id).await?;
        if !product.is_active {
            return Err(LendingError::validation(format!(
                "loan product '{}' is not active",
                product.name
            )));
        }

        let score = self.scorer.score(application.farmer_id).await?;
        let mut loan = Loan::new(
            application.farmer_id,
            application.product_id,
            application.phone.clone(),
            application.amount,
            Some(score),
            now,
        );

        if let Err(e) = self.check_eligibility(&product, &application, score).await {
            if let LendingError::Validation { reason } = &e {
                loan.reject(reason.clone())?;
                self.store.insert_loan(loan).await?;
            }
            return Err(e);
        }

        self.store.insert_loan(loan.clone()).await?;
        info!(loan_id = %loan.id, amount = %application.amount, score, "loan application accepted");
        Ok(loan)
    }

    async fn check_eligibility(
        &self,
        product: &LoanProduct,
        application: &LoanApplication,
        score: u8,
    ) -> LendingResult<()> {
        product.validate_amount(application.amount)?;

        let existing = self.store.loans_for_farmer(application.farmer_id).await?;
        if existing.iter().any(|l| l.status.is_open()) {
            return Err(LendingError::validation("farmer has existing active loans"));
        }

        if score < self.risk.minimum_credit_score {
            return Err(LendingError::validation(format!(
                "credit score ({}) below minimum requirement ({})",
                score, self.risk.minimum_credit_score
            )));
        }

        let exposure: Money = existing
            .iter()
            .filter(|l| l.status.is_outstanding_exposure())
            .filter_map(|l| l.amount_approved)
            .sum();
        if exposure + application.amount > self.risk.maximum_exposure {
            return Err(LendingError::validation(format!(
                "maximum exposure limit reached ({} outstanding, {} cap)",
                exposure, self.risk.maximum_exposure
            )));
        }
        Ok(())
    }

    /// PENDING -> APPROVED. An explicit amount overrides the requested one
    /// and is re-validated against the product bounds.
    pub async fn approve(&self, loan_id: LoanId, amount: Option<Money>) -> LendingResult<Loan> {
        let _guard = self.locks.acquire(loan_id).await?;
        let mut loan = self.store.loan(loan_id).await?;
        if let Some(a) = amount {
            let product = self.store.product(loan.product_id).await?;
            product.validate_amount(a)?;
        }
        loan.approve(amount, Utc::now())?;
        self.store.update_loan(&loan).await?;
        info!(loan_id = %loan.id, amount = ?loan.amount_approved, "loan approved");

        let approved = loan.approved_amount()?;
        send_quietly(
            self.notifications.as_ref(),
            &loan.phone,
            &messages::loan_approved(approved, &self.risk.currency),
        )
        .await;
        Ok(loan)
    }

    /// PENDING -> REJECTED with a caller-visible reason.
    pub async fn reject(&self, loan_id: LoanId, reason: &str) -> LendingResult<Loan> {
        let _guard = self.locks.acquire(loan_id).await?;
        let mut loan = self.store.loan(loan_id).await?;
        loan.reject(reason)?;
        self.store.update_loan(&loan).await?;
        info!(loan_id = %loan.id, reason, "loan rejected");

        send_quietly(
            self.notifications.as_ref(),
            &loan.phone,
            &messages::loan_rejected(reason),
        )
        .await;
        Ok(loan)
    }

    /// Administrative write-off: any non-terminal state -> DEFAULTED.
    pub async fn mark_defaulted(&self, loan_id: LoanId) -> LendingResult<Loan> {
        let _guard = self.locks.acquire(loan_id).await?;
        let mut loan = self.store.loan(loan_id).await?;
        loan.mark_defaulted()?;
        self.store.update_loan(&loan).await?;
        info!(loan_id = %loan.id, "loan defaulted");
        Ok(loan)
    }

    /// Idempotent re-derivation of ACTIVE / OVERDUE / PAID for a loan.
    pub async fn recompute_status(&self, loan_id: LoanId) -> LendingResult<Loan> {
        let _guard = self.locks.acquire(loan_id).await?;
        let mut loan = self.store.loan(loan_id).await?;
        refresh_loan_status(self.store.as_ref(), &mut loan, Utc::now()).await?;
        Ok(loan)
    }

    /// Attach an explicit installment plan to a disbursed loan whose
    /// product is `ScheduleType::Custom`. Guarded like generated schedules:
    /// at most one plan per loan.
    pub async fn attach_custom_schedule(
        &self,
        loan_id: LoanId,
        entries: &[CustomEntry],
    ) -> LendingResult<Vec<Installment>> {
        let _guard = self.locks.acquire(loan_id).await?;
        let loan = self.store.loan(loan_id).await?;
        if loan.disbursement_date.is_none() {
            return Err(LendingError::validation(
                "cannot schedule a loan that has not been disbursed",
            ));
        }
        if self.store.schedule_exists(loan_id).await? {
            return Err(LendingError::validation("loan already has a payment schedule"));
        }
        let rows = build_custom_schedule(&loan, entries)?;
        self.store.insert_installments(rows.clone()).await?;
        info!(loan_id = %loan.id, installments = rows.len(), "custom schedule attached");
        Ok(rows)
    }

    /// Outstanding principal balance for a loan.
    pub async fn balance(&self, loan_id: LoanId) -> LendingResult<Money> {
        let loan = self.store.loan(loan_id).await?;
        let repaid = total_repaid(self.store.as_ref(), loan_id).await?;
        Ok(loan.balance(repaid))
    }
}

/// Sum of all recorded repayments against a loan.
pub(crate) async fn total_repaid(
    store: &dyn LedgerStore,
    loan_id: LoanId,
) -> LendingResult<Money> {
    Ok(store
        .repayments_for_loan(loan_id)
        .await?
        .iter()
        .map(|r| r.amount)
        .sum())
}

/// Re-derive and persist a loan's status from its repayments and schedule.
/// Must be called with the loan's lock held.
pub(crate) async fn refresh_loan_status(
    store: &dyn LedgerStore,
    loan: &mut Loan,
    now: DateTime<Utc>,
) -> LendingResult<()> {
    let repaid = total_repaid(store, loan.id).await?;
    let rows = store.installments_for_loan(loan.id).await?;
    let any_overdue = rows
        .iter()
        .any(|r| r.status.is_outstanding() && r.due_date < now);
    let before = loan.status;
    loan.recompute_status(repaid, any_overdue, now);
    if loan.status != before {
        info!(loan_id = %loan.id, from = %before, to = %loan.status, "loan status recomputed");
    }
    store.update_loan(loan).await?;
    Ok(())
}
