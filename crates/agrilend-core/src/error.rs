use thiserror::Error;

use crate::loan::LoanStatus;
use crate::types::LoanId;

/// Central error taxonomy for the lending engine.
///
/// Visibility rules differ per variant: `Validation` and `Gateway` are
/// surfaced to callers with readable reasons, `ReconciliationConflict` is
/// logged and swallowed (duplicate deliveries are expected traffic),
/// `Notification` never fails the owning financial operation.
#[derive(Debug, Error)]
pub enum LendingError {
    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Reconciliation conflict: {0}")]
    ReconciliationConflict(String),

    #[error("Loan {0} is locked by another operation; retry")]
    LockContention(LoanId),

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Illegal loan transition from {from} to {to}")]
    IllegalTransition { from: LoanStatus, to: LoanStatus },

    #[error("Store error: {0}")]
    Store(String),
}

impl LendingError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type LendingResult<T> = Result<T, LendingError>;

/// Failures raised by the mobile-money gateway adapter. The owning
/// `Transaction` is marked FAILED before one of these is returned; the Loan
/// itself is never mutated on a gateway failure.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network failure: {0}")]
    Network(String),

    #[error("gateway rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("token acquisition for {scope} scope failed with HTTP {status}")]
    Auth { scope: &'static str, status: u16 },

    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),
}
