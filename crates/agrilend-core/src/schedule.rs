use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LendingError, LendingResult};
use crate::loan::Loan;
use crate::product::{LoanProduct, ScheduleType};
use crate::types::{to_cents, FarmerId, LoanId, Money};

/// Days in one scheduling period. Fixed schedules space installments by
/// this and the monthly interest convention divides elapsed days by it.
pub const DAYS_PER_PERIOD: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Overdue,
    Paid,
}

impl InstallmentStatus {
    /// Still owed money: eligible for allocation and overdue sweeps.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Pending | Self::Partial | Self::Overdue)
    }
}

/// One row of a loan's payment schedule.
///
/// Invariants: `amount = principal_amount + interest_amount`;
/// `amount_paid <= amount + penalty_amount`; across a loan the amounts sum
/// to the approved principal plus total scheduled interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installment {
    pub loan_id: LoanId,
    pub installment_number: u32,
    pub due_date: DateTime<Utc>,
    pub principal_amount: Money,
    pub interest_amount: Money,
    pub amount: Money,
    pub amount_paid: Money,
    pub penalty_amount: Money,
    pub status: InstallmentStatus,
    pub last_reminder_at: Option<DateTime<Utc>>,
}

impl Installment {
    fn new(
        loan_id: LoanId,
        installment_number: u32,
        due_date: DateTime<Utc>,
        principal: Money,
        interest: Money,
    ) -> Self {
        Self {
            loan_id,
            installment_number,
            due_date,
            principal_amount: principal,
            interest_amount: interest,
            amount: principal + interest,
            amount_paid: Decimal::ZERO,
            penalty_amount: Decimal::ZERO,
            status: InstallmentStatus::Pending,
            last_reminder_at: None,
        }
    }

    /// What clears this installment right now: amount plus accrued penalty
    /// minus whatever was already paid.
    pub fn total_due(&self) -> Money {
        self.amount + self.penalty_amount - self.amount_paid
    }
}

/// Explicit entry for a `ScheduleType::Custom` plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomEntry {
    pub due_date: DateTime<Utc>,
    pub principal_amount: Money,
    pub interest_amount: Money,
}

/// Read-only collaborator that knows a farmer's expected harvest dates.
/// Crop-cycle management itself lives outside the engine.
#[async_trait]
pub trait HarvestCalendar: Send + Sync {
    async fn harvest_dates(&self, farmer_id: FarmerId) -> LendingResult<Vec<NaiveDate>>;
}

/// Calendar with no known harvests; harvest-typed products then fall back
/// to the fixed layout.
pub struct NoHarvestCalendar;

#[async_trait]
impl HarvestCalendar for NoHarvestCalendar {
    async fn harvest_dates(&self, _farmer_id: FarmerId) -> LendingResult<Vec<NaiveDate>> {
        Ok(Vec::new())
    }
}

/// Build the installment plan for a freshly disbursed loan.
///
/// Pure: the caller persists the returned rows inside the same atomic unit
/// as its schedule-existence check, which is what makes generation safe to
/// invoke at most once per loan.
pub fn build_schedule(
    loan: &Loan,
    product: &LoanProduct,
    harvest_dates: &[NaiveDate],
) -> LendingResult<Vec<Installment>> {
    let approved = loan.approved_amount()?;
    let disbursed_at = loan.disbursement_date.ok_or_else(|| {
        LendingError::validation("cannot schedule a loan that has not been disbursed")
    })?;

    match product.schedule_type {
        ScheduleType::Fixed => fixed_schedule(loan, product, approved, disbursed_at),
        ScheduleType::Harvest => {
            if harvest_dates.is_empty() {
                // No known harvests: fall back to the fixed layout.
                fixed_schedule(loan, product, approved, disbursed_at)
            } else {
                harvest_schedule(loan, product, approved, disbursed_at, harvest_dates)
            }
        }
        ScheduleType::Custom => Err(LendingError::validation(
            "custom-schedule products take an explicit plan; use build_custom_schedule",
        )),
    }
}

/// Build a plan from caller-supplied entries (`ScheduleType::Custom`).
pub fn build_custom_schedule(loan: &Loan, entries: &[CustomEntry]) -> LendingResult<Vec<Installment>> {
    let approved = loan.approved_amount()?;
    if entries.is_empty() {
        return Err(LendingError::validation("custom plan has no entries"));
    }
    let principal_total: Money = entries.iter().map(|e| e.principal_amount).sum();
    if principal_total != approved {
        return Err(LendingError::validation(format!(
            "custom plan principal {} does not match approved amount {}",
            principal_total, approved
        )));
    }
    let mut rows = Vec::with_capacity(entries.len());
    let mut previous_due: Option<DateTime<Utc>> = None;
    for (i, entry) in entries.iter().enumerate() {
        if let Some(prev) = previous_due {
            if entry.due_date < prev {
                return Err(LendingError::validation(
                    "custom plan due dates must be ascending",
                ));
            }
        }
        previous_due = Some(entry.due_date);
        rows.push(Installment::new(
            loan.id,
            (i + 1) as u32,
            entry.due_date,
            to_cents(entry.principal_amount),
            to_cents(entry.interest_amount),
        ));
    }
    Ok(rows)
}

fn fixed_schedule(
    loan: &Loan,
    product: &LoanProduct,
    approved: Money,
    disbursed_at: DateTime<Utc>,
) -> LendingResult<Vec<Installment>> {
    let periods = product.duration_days / DAYS_PER_PERIOD;
    if periods == 0 {
        return Err(LendingError::validation(format!(
            "fixed schedules need a duration of at least {} days, got {}",
            DAYS_PER_PERIOD, product.duration_days
        )));
    }

    let principals = split_principal(approved, periods as usize);
    let monthly_rate = product.monthly_rate();

    let mut rows = Vec::with_capacity(periods as usize);
    let mut remaining = approved;
    for (i, principal) in principals.into_iter().enumerate() {
        // Interest charged on the balance still outstanding this period.
        let interest = to_cents(remaining * monthly_rate);
        let due = disbursed_at + Duration::days(DAYS_PER_PERIOD * (i as i64 + 1));
        rows.push(Installment::new(loan.id, (i + 1) as u32, due, principal, interest));
        remaining -= principal;
    }
    Ok(rows)
}

fn harvest_schedule(
    loan: &Loan,
    product: &LoanProduct,
    approved: Money,
    disbursed_at: DateTime<Utc>,
    harvest_dates: &[NaiveDate],
) -> LendingResult<Vec<Installment>> {
    let mut dates = harvest_dates.to_vec();
    dates.sort_unstable();

    let disbursed_on = disbursed_at.date_naive();
    if let Some(first) = dates.first() {
        if *first < disbursed_on {
            return Err(LendingError::validation(format!(
                "harvest date {} precedes disbursement date {}",
                first, disbursed_on
            )));
        }
    }

    let principals = split_principal(approved, dates.len());
    let monthly_rate = product.monthly_rate();

    let mut rows = Vec::with_capacity(dates.len());
    for (i, (harvest, principal)) in dates.iter().zip(principals).enumerate() {
        // Interest accrues with the months elapsed between disbursement and
        // the harvest the installment is tied to.
        let elapsed_days = (*harvest - disbursed_on).num_days();
        let elapsed_months = Decimal::from(elapsed_days) / Decimal::from(DAYS_PER_PERIOD);
        let interest = to_cents(principal * monthly_rate * elapsed_months);
        let due_day = *harvest + Duration::days(product.grace_period_days);
        let due = due_day.and_time(NaiveTime::MIN).and_utc();
        rows.push(Installment::new(loan.id, (i + 1) as u32, due, principal, interest));
    }
    Ok(rows)
}

/// Split an amount into `parts` cent-rounded slices, the last absorbing the
/// rounding residue so the slices always sum back to the whole.
fn split_principal(amount: Money, parts: usize) -> Vec<Money> {
    let n = Decimal::from(parts as u64);
    let each = to_cents(amount / n);
    let mut out = vec![each; parts];
    if let Some(last) = out.last_mut() {
        *last = amount - each * (n - Decimal::ONE);
    }
    out
}
