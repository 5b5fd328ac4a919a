use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::LendingResult;
use crate::ledger::refresh_loan_status;
use crate::notify::{messages, send_quietly, NotificationSink};
use crate::schedule::InstallmentStatus;
use crate::store::{LedgerStore, LoanLocks};
use crate::types::{Currency, LoanId, Money, to_cents};

/// Penalty charged per day overdue, as a fraction of the installment amount.
pub const DAILY_PENALTY_RATE: Decimal = dec!(0.01);

/// Ceiling on the accrued penalty, as a fraction of the installment amount.
pub const PENALTY_CAP_RATE: Decimal = dec!(0.30);

/// Minimum spacing between overdue reminders per installment.
const REMINDER_WINDOW: Duration = Duration::hours(24);

/// Penalty for an installment `days_overdue` past its due date.
///
/// Recomputed from scratch on every sweep, never accumulated, so repeated
/// runs converge instead of compounding: `amount * min(1% * days, 30%)`.
pub fn compute_penalty(amount: Money, days_overdue: i64) -> Money {
    if days_overdue <= 0 {
        return Decimal::ZERO;
    }
    let rate = (DAILY_PENALTY_RATE * Decimal::from(days_overdue)).min(PENALTY_CAP_RATE);
    to_cents(amount * rate)
}

/// Outcome of one accrual sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub installments_swept: usize,
    pub reminders_sent: usize,
    pub loans_touched: usize,
}

/// Periodic processor that marks installments overdue, (re)computes their
/// capped penalties and nudges borrowers at most once per 24h window.
pub struct OverdueAccrualProcessor {
    store: Arc<dyn LedgerStore>,
    locks: Arc<LoanLocks>,
    notifications: Arc<dyn NotificationSink>,
    currency: Currency,
}

impl OverdueAccrualProcessor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        locks: Arc<LoanLocks>,
        notifications: Arc<dyn NotificationSink>,
        currency: Currency,
    ) -> Self {
        Self {
            store,
            locks,
            notifications,
            currency,
        }
    }

    /// Sweep all outstanding installments past due as of `now`.
    ///
    /// Work is grouped per loan and executed under that loan's lock, so a
    /// sweep never interleaves with a reconciliation on the same aggregate.
    /// A failure on one loan is logged and does not abort the rest.
    pub async fn sweep(&self, now: DateTime<Utc>) -> LendingResult<SweepOutcome> {
        let candidates = self.store.overdue_candidates(now).await?;

        let by_loan: BTreeSet<LoanId> = candidates.iter().map(|r| r.loan_id).collect();

        let mut outcome = SweepOutcome::default();
        for &loan_id in &by_loan {
            match self.sweep_loan(loan_id, now).await {
                Ok((swept, reminded)) => {
                    outcome.installments_swept += swept;
                    outcome.reminders_sent += reminded;
                    outcome.loans_touched += 1;
                }
                Err(e) => warn!(%loan_id, error = %e, "overdue sweep skipped loan"),
            }
        }
        info!(
            loans = outcome.loans_touched,
            installments = outcome.installments_swept,
            reminders = outcome.reminders_sent,
            "overdue accrual sweep complete"
        );
        Ok(outcome)
    }

    async fn sweep_loan(
        &self,
        loan_id: LoanId,
        now: DateTime<Utc>,
    ) -> LendingResult<(usize, usize)> {
        let _guard = self.locks.acquire(loan_id).await?;
        let mut loan = self.store.loan(loan_id).await?;

        let mut swept = 0;
        let mut reminded = 0;
        for mut row in self.store.installments_for_loan(loan_id).await? {
            if !row.status.is_outstanding() || row.due_date >= now {
                continue;
            }
            let days_overdue = (now - row.due_date).num_days();
            row.penalty_amount = compute_penalty(row.amount, days_overdue);
            row.status = InstallmentStatus::Overdue;

            let reminder_due = match row.last_reminder_at {
                None => true,
                Some(last) => now - last >= REMINDER_WINDOW,
            };
            if reminder_due {
                send_quietly(
                    self.notifications.as_ref(),
                    &loan.phone,
                    &messages::payment_overdue(row.total_due(), &self.currency, days_overdue),
                )
                .await;
                row.last_reminder_at = Some(now);
                reminded += 1;
            }

            self.store.update_installment(&row).await?;
            swept += 1;
        }

        refresh_loan_status(self.store.as_ref(), &mut loan, now).await?;
        Ok((swept, reminded))
    }
}
