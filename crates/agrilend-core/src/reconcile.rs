use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::allocation::allocate;
use crate::error::LendingResult;
use crate::gateway::{GatewayScope, GatewayTransferStatus, MobileMoneyGateway};
use crate::ledger::{refresh_loan_status, total_repaid};
use crate::loan::LoanStatus;
use crate::notify::{messages, send_quietly, NotificationSink};
use crate::product::ScheduleType;
use crate::schedule::{build_schedule, HarvestCalendar};
use crate::store::{LedgerStore, LoanLocks};
use crate::transaction::{LoanRepayment, Transaction, TransactionKind};
use crate::types::Currency;

/// What a reconciliation attempt did. Duplicates and unknown references are
/// expected traffic under the webhook+poll race, so they are outcomes here,
/// never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    /// The transaction went terminal and its ledger effects were applied.
    Applied,
    /// The transaction was already terminal; nothing to do.
    Duplicate,
    /// No transaction carries this reference (forged or foreign callback).
    UnknownReference,
    /// The gateway still reports PENDING.
    StillPending,
    /// The gateway reported failure; the transaction is now FAILED and the
    /// loan was left untouched.
    MarkedFailed,
}

/// The single idempotent entry point that merges gateway status updates
/// into the ledger. Both the webhook handler and the status poller call
/// [`reconcile`](ReconciliationCoordinator::reconcile); funnelling both
/// paths through one terminal-state check is what makes duplicate
/// deliveries safe.
pub struct ReconciliationCoordinator {
    store: Arc<dyn LedgerStore>,
    locks: Arc<LoanLocks>,
    notifications: Arc<dyn NotificationSink>,
    harvests: Arc<dyn HarvestCalendar>,
    currency: Currency,
}

impl ReconciliationCoordinator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        locks: Arc<LoanLocks>,
        notifications: Arc<dyn NotificationSink>,
        harvests: Arc<dyn HarvestCalendar>,
        currency: Currency,
    ) -> Self {
        Self {
            store,
            locks,
            notifications,
            harvests,
            currency,
        }
    }

    /// Apply a reported gateway status to the transaction carrying
    /// `reference`, and on success to its loan, all inside the loan's
    /// atomic unit.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        reference: &str,
        reported: GatewayTransferStatus,
    ) -> LendingResult<ReconcileOutcome> {
        let Some(tx) = self.store.transaction_by_reference(reference).await? else {
            warn!(reference, "status update for unknown reference ignored");
            return Ok(ReconcileOutcome::UnknownReference);
        };

        let _guard = self.locks.acquire(tx.loan_id).await?;
        // Re-read under the lock: a concurrent delivery may have won the
        // race while we were waiting.
        let Some(mut tx) = self.store.transaction_by_reference(reference).await? else {
            return Ok(ReconcileOutcome::UnknownReference);
        };
        if tx.status.is_terminal() {
            debug!(reference, "duplicate delivery for terminal transaction; no-op");
            return Ok(ReconcileOutcome::Duplicate);
        }

        match reported {
            GatewayTransferStatus::Pending => Ok(ReconcileOutcome::StillPending),
            GatewayTransferStatus::Failed => {
                let now = Utc::now();
                tx.mark_failed(now);
                self.store.update_transaction(&tx).await?;
                warn!(reference, kind = %tx.kind, "gateway reported failure; loan left untouched");
                Ok(ReconcileOutcome::MarkedFailed)
            }
            GatewayTransferStatus::Successful => {
                let now = Utc::now();
                tx.mark_successful(now);
                self.store.update_transaction(&tx).await?;
                match tx.kind {
                    TransactionKind::Repayment => self.apply_repayment(&tx, now).await?,
                    TransactionKind::Disbursement => self.apply_disbursement(&tx, now).await?,
                }
                info!(reference, kind = %tx.kind, "gateway confirmation applied");
                Ok(ReconcileOutcome::Applied)
            }
        }
    }

    async fn apply_repayment(&self, tx: &Transaction, now: DateTime<Utc>) -> LendingResult<()> {
        // At most one LoanRepayment per reference: the existence check and
        // the insert run inside the same loan-locked unit.
        if self.store.repayment_exists(&tx.external_reference).await? {
            warn!(
                reference = %tx.external_reference,
                "repayment already recorded for reference; skipping"
            );
            return Ok(());
        }
        self.store
            .insert_repayment(LoanRepayment {
                loan_id: tx.loan_id,
                amount: tx.amount,
                payment_date: now,
                external_reference: tx.external_reference.clone(),
            })
            .await?;

        let mut rows = self.store.installments_for_loan(tx.loan_id).await?;
        if !rows.is_empty() {
            let outcome = allocate(&mut rows, tx.amount)?;
            for line in &outcome.lines {
                if let Some(row) = rows
                    .iter()
                    .find(|r| r.installment_number == line.installment_number)
                {
                    self.store.update_installment(row).await?;
                }
            }
            if outcome.remainder > Decimal::ZERO {
                info!(
                    loan_id = %tx.loan_id,
                    remainder = %outcome.remainder,
                    "payment exceeded outstanding schedule; surplus stays on the loan balance"
                );
            }
        }

        let mut loan = self.store.loan(tx.loan_id).await?;
        refresh_loan_status(self.store.as_ref(), &mut loan, now).await?;

        let repaid = total_repaid(self.store.as_ref(), loan.id).await?;
        let message = if loan.status == LoanStatus::Paid {
            messages::loan_repaid(loan.approved_amount()?, &self.currency)
        } else {
            messages::payment_received(tx.amount, loan.balance(repaid), &self.currency)
        };
        send_quietly(self.notifications.as_ref(), &loan.phone, &message).await;
        Ok(())
    }

    async fn apply_disbursement(&self, tx: &Transaction, now: DateTime<Utc>) -> LendingResult<()> {
        let mut loan = self.store.loan(tx.loan_id).await?;
        if loan.status != LoanStatus::Approved {
            warn!(
                loan_id = %loan.id,
                status = %loan.status,
                "disbursement confirmation for loan not awaiting one; ignoring"
            );
            return Ok(());
        }

        let product = self.store.product(loan.product_id).await?;
        loan.mark_disbursed(product.duration_days, now)?;
        loan.gateway_reference = Some(tx.external_reference.clone());
        self.store.update_loan(&loan).await?;

        // First successful disbursement generates the plan, exactly once.
        if self.store.schedule_exists(loan.id).await? {
            debug!(loan_id = %loan.id, "schedule already present; generation skipped");
        } else if product.schedule_type == ScheduleType::Custom {
            info!(loan_id = %loan.id, "custom-schedule product; plan must be attached explicitly");
        } else {
            let dates = self.harvests.harvest_dates(loan.farmer_id).await?;
            let rows = build_schedule(&loan, &product, &dates)?;
            self.store.insert_installments(rows).await?;
            info!(loan_id = %loan.id, "payment schedule generated");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Webhook ingress
// ---------------------------------------------------------------------------

/// The gateway's asynchronous callback body. Field names vary between
/// deployments, hence the aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default, alias = "transaction_id")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default, alias = "phone_number")]
    pub payer_phone: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Transport-agnostic webhook verdict. The HTTP layer maps it 1:1 onto a
/// status code: recognised outcomes (including ignored duplicates) are 200,
/// malformed payloads 400, internal failures 500 — the gateway's redelivery
/// is safe because reconcile is idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    Accepted(ReconcileOutcome),
    Ignored(String),
    BadRequest(String),
    Failed(String),
}

impl WebhookAck {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Accepted(_) | Self::Ignored(_) => 200,
            Self::BadRequest(_) => 400,
            Self::Failed(_) => 500,
        }
    }
}

impl ReconciliationCoordinator {
    /// Ingest a raw webhook body.
    ///
    /// The reported amount is parsed but deliberately not trusted: the
    /// transaction row is authoritative for how much money moved.
    pub async fn handle_webhook(&self, raw: serde_json::Value) -> WebhookAck {
        let payload: WebhookPayload = match serde_json::from_value(raw) {
            Ok(p) => p,
            Err(e) => return WebhookAck::BadRequest(format!("malformed webhook payload: {e}")),
        };
        let Some(reference) = payload.external_id else {
            return WebhookAck::BadRequest("missing external_id/transaction_id".to_string());
        };

        // Absent status means the network only calls back on success.
        let status = match payload.status.as_deref() {
            None | Some("SUCCESSFUL") | Some("COMPLETED") => GatewayTransferStatus::Successful,
            Some("FAILED") => GatewayTransferStatus::Failed,
            Some("PENDING") => GatewayTransferStatus::Pending,
            Some(other) => {
                return WebhookAck::Ignored(format!("payment not successful: {other}"));
            }
        };

        match self.reconcile(&reference, status).await {
            Ok(outcome) => WebhookAck::Accepted(outcome),
            Err(e) => {
                error!(reference = %reference, error = %e, "webhook reconciliation failed");
                WebhookAck::Failed(e.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Status polling
// ---------------------------------------------------------------------------

/// Bounds for a poll loop: never retries indefinitely.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval_secs: u64,
    /// 1 keeps the interval fixed; >1 backs off geometrically.
    pub backoff_multiplier: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval_secs: 5,
            backoff_multiplier: 1,
        }
    }
}

/// Attempt-capped poll loop started right after a gateway call; the second
/// ingress path besides the webhook, converging on the same `reconcile`.
pub struct StatusPoller {
    gateway: Arc<dyn MobileMoneyGateway>,
    coordinator: Arc<ReconciliationCoordinator>,
}

impl StatusPoller {
    pub fn new(
        gateway: Arc<dyn MobileMoneyGateway>,
        coordinator: Arc<ReconciliationCoordinator>,
    ) -> Self {
        Self {
            gateway,
            coordinator,
        }
    }

    /// Poll until the transaction goes terminal or the attempt cap is hit.
    pub async fn poll(
        &self,
        scope: GatewayScope,
        reference: &str,
        policy: PollPolicy,
    ) -> LendingResult<ReconcileOutcome> {
        let mut delay = policy.interval_secs.max(1);
        for attempt in 1..=policy.max_attempts {
            match self.gateway.status(scope, reference).await {
                Ok(response) => {
                    let outcome = self.coordinator.reconcile(reference, response.status).await?;
                    if outcome != ReconcileOutcome::StillPending {
                        return Ok(outcome);
                    }
                    debug!(reference, attempt, "gateway still processing");
                }
                Err(e) => warn!(reference, attempt, error = %e, "status poll attempt failed"),
            }
            if attempt < policy.max_attempts {
                tokio::time::sleep(Duration::from_secs(delay)).await;
                delay = delay.saturating_mul(policy.backoff_multiplier.max(1));
            }
        }
        debug!(reference, "poll attempts exhausted; awaiting webhook");
        Ok(ReconcileOutcome::StillPending)
    }
}
