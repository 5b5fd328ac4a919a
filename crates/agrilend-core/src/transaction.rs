use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Currency, LoanId, Money, Msisdn, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Disbursement,
    Repayment,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disbursement => write!(f, "DISBURSEMENT"),
            Self::Repayment => write!(f, "REPAYMENT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Successful,
    Failed,
}

impl TransactionStatus {
    /// Terminal transactions are never mutated again; a second notification
    /// for the same reference is a duplicate and must no-op.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed)
    }
}

/// One gateway call attempt. Created on every outbound disbursement or
/// collection request and mutated only by the reconciliation coordinator.
///
/// `external_reference` doubles as the gateway `externalId` and is the
/// idempotency key for the whole reconciliation path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub loan_id: LoanId,
    pub kind: TransactionKind,
    pub amount: Money,
    pub currency: Currency,
    pub external_reference: String,
    pub phone: Msisdn,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        loan_id: LoanId,
        kind: TransactionKind,
        amount: Money,
        currency: Currency,
        external_reference: String,
        phone: Msisdn,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            loan_id,
            kind,
            amount,
            currency,
            external_reference,
            phone,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_successful(&mut self, now: DateTime<Utc>) {
        self.status = TransactionStatus::Successful;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = TransactionStatus::Failed;
        self.updated_at = now;
    }
}

/// Record of money received against a loan. Exactly one exists per
/// SUCCESSFUL repayment transaction, guarded by an existence check on
/// `external_reference` inside the reconciliation atomic unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRepayment {
    pub loan_id: LoanId,
    pub amount: Money,
    pub payment_date: DateTime<Utc>,
    pub external_reference: String,
}
