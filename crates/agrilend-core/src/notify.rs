use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::LendingError;
use crate::types::{Currency, Money, Msisdn};

/// Outbound notification seam (SMS in production). Sends are
/// fire-and-forget: a failed send is logged and never rolls back or blocks
/// the owning financial operation.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, phone: &Msisdn, message: &str) -> Result<(), LendingError>;
}

/// Sink that only logs. Useful as a default and in tests.
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn send(&self, phone: &Msisdn, message: &str) -> Result<(), LendingError> {
        info!(%phone, message, "notification");
        Ok(())
    }
}

/// Send without letting a sink failure escape into the caller.
pub(crate) async fn send_quietly(sink: &dyn NotificationSink, phone: &Msisdn, message: &str) {
    if let Err(e) = sink.send(phone, message).await {
        warn!(%phone, error = %e, "notification delivery failed");
    }
}

/// Borrower-facing message catalogue.
pub mod messages {
    use super::*;

    pub fn loan_approved(amount: Money, currency: &Currency) -> String {
        format!(
            "Your loan application for {amount} {currency} has been approved! \
             Funds will be disbursed shortly."
        )
    }

    pub fn loan_rejected(reason: &str) -> String {
        format!("Your loan application was declined: {reason}")
    }

    pub fn disbursement_in_progress(amount: Money, currency: &Currency) -> String {
        format!(
            "Your loan of {amount} {currency} is being disbursed to your \
             mobile money account."
        )
    }

    pub fn payment_received(amount: Money, balance: Money, currency: &Currency) -> String {
        format!("Payment of {amount} {currency} received. Remaining balance: {balance} {currency}")
    }

    pub fn loan_repaid(amount: Money, currency: &Currency) -> String {
        format!("Congratulations! Your loan of {amount} {currency} has been fully repaid.")
    }

    pub fn payment_overdue(amount: Money, currency: &Currency, days_overdue: i64) -> String {
        format!(
            "PAYMENT OVERDUE: Your payment of {amount} {currency} is \
             {days_overdue} days overdue. Please pay as soon as possible to \
             avoid further penalties."
        )
    }
}
