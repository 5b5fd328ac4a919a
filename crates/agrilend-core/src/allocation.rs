use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LendingError, LendingResult};
use crate::schedule::{Installment, InstallmentStatus};
use crate::types::Money;

/// How much of a payment landed on one installment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationLine {
    pub installment_number: u32,
    pub applied: Money,
    pub new_status: InstallmentStatus,
}

/// Result of distributing a payment across a loan's schedule.
///
/// `allocated + remainder` always equals the incoming amount; the remainder
/// is credited back to the caller, never dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub lines: Vec<AllocationLine>,
    pub allocated: Money,
    pub remainder: Money,
}

/// Distribute `amount` across outstanding installments, oldest due first.
///
/// For each installment the amount still owed is
/// `amount + penalty_amount - amount_paid`. A full cover marks the row PAID
/// and moves on; a partial cover marks it PARTIAL and stops the waterfall.
/// Mutates the slice in place; the caller persists the touched rows inside
/// the owning loan's atomic unit.
pub fn allocate(installments: &mut [Installment], amount: Money) -> LendingResult<AllocationOutcome> {
    if amount <= Decimal::ZERO {
        return Err(LendingError::validation(format!(
            "payment amount must be positive, got {}",
            amount
        )));
    }

    let mut open: Vec<&mut Installment> = installments
        .iter_mut()
        .filter(|i| i.status.is_outstanding())
        .collect();
    open.sort_by_key(|i| (i.due_date, i.installment_number));

    let mut remaining = amount;
    let mut lines = Vec::new();

    for installment in open {
        if remaining <= Decimal::ZERO {
            break;
        }
        let total_due = installment.total_due();
        if total_due <= Decimal::ZERO {
            // Already covered (e.g. a penalty recompute shrank the debt);
            // just settle the status.
            installment.status = InstallmentStatus::Paid;
            continue;
        }
        if remaining >= total_due {
            installment.amount_paid += total_due;
            installment.status = InstallmentStatus::Paid;
            remaining -= total_due;
            lines.push(AllocationLine {
                installment_number: installment.installment_number,
                applied: total_due,
                new_status: InstallmentStatus::Paid,
            });
        } else {
            installment.amount_paid += remaining;
            installment.status = InstallmentStatus::Partial;
            lines.push(AllocationLine {
                installment_number: installment.installment_number,
                applied: remaining,
                new_status: InstallmentStatus::Partial,
            });
            remaining = Decimal::ZERO;
            break;
        }
    }

    Ok(AllocationOutcome {
        lines,
        allocated: amount - remaining,
        remainder: remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LoanId;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn installment(number: u32, due_in_days: i64, amount: Money) -> Installment {
        Installment {
            loan_id: LoanId::nil(),
            installment_number: number,
            due_date: Utc::now() + Duration::days(due_in_days),
            principal_amount: amount,
            interest_amount: dec!(0),
            amount,
            amount_paid: dec!(0),
            penalty_amount: dec!(0),
            status: InstallmentStatus::Pending,
            last_reminder_at: None,
        }
    }

    #[test]
    fn test_waterfall_ordering() {
        // Installments due on day 10, 20, 30 with 100 each; paying 150 fully
        // covers day-10, half-covers day-20 and leaves day-30 untouched.
        let mut rows = vec![
            installment(3, 30, dec!(100)),
            installment(1, 10, dec!(100)),
            installment(2, 20, dec!(100)),
        ];
        let outcome = allocate(&mut rows, dec!(150)).unwrap();

        assert_eq!(outcome.allocated, dec!(150));
        assert_eq!(outcome.remainder, dec!(0));
        assert_eq!(outcome.lines.len(), 2);
        assert_eq!(outcome.lines[0].installment_number, 1);
        assert_eq!(outcome.lines[0].applied, dec!(100));
        assert_eq!(outcome.lines[1].installment_number, 2);
        assert_eq!(outcome.lines[1].applied, dec!(50));

        let by_number = |n: u32| rows.iter().find(|r| r.installment_number == n).unwrap();
        assert_eq!(by_number(1).status, InstallmentStatus::Paid);
        assert_eq!(by_number(2).status, InstallmentStatus::Partial);
        assert_eq!(by_number(2).amount_paid, dec!(50));
        assert_eq!(by_number(3).status, InstallmentStatus::Pending);
        assert_eq!(by_number(3).amount_paid, dec!(0));
    }

    #[test]
    fn test_conservation_with_remainder() {
        let mut rows = vec![installment(1, 10, dec!(100)), installment(2, 20, dec!(100))];
        let outcome = allocate(&mut rows, dec!(250)).unwrap();

        // Everything owed is 200; the extra 50 comes back.
        assert_eq!(outcome.allocated, dec!(200));
        assert_eq!(outcome.remainder, dec!(50));
        assert_eq!(outcome.allocated + outcome.remainder, dec!(250));
        let paid: Money = rows.iter().map(|r| r.amount_paid).sum();
        assert_eq!(paid, dec!(200));
        assert!(rows.iter().all(|r| r.status == InstallmentStatus::Paid));
    }

    #[test]
    fn test_penalty_included_in_total_due() {
        let mut rows = vec![installment(1, -5, dec!(100))];
        rows[0].penalty_amount = dec!(5);
        rows[0].status = InstallmentStatus::Overdue;

        // 100 alone does not clear amount + penalty
        let outcome = allocate(&mut rows, dec!(100)).unwrap();
        assert_eq!(outcome.remainder, dec!(0));
        assert_eq!(rows[0].status, InstallmentStatus::Partial);
        assert_eq!(rows[0].total_due(), dec!(5));

        // the remaining 5 finishes it
        let outcome = allocate(&mut rows, dec!(5)).unwrap();
        assert_eq!(outcome.allocated, dec!(5));
        assert_eq!(rows[0].status, InstallmentStatus::Paid);
        assert_eq!(rows[0].amount_paid, dec!(105));
    }

    #[test]
    fn test_partial_payments_accumulate() {
        let mut rows = vec![installment(1, 10, dec!(100))];
        allocate(&mut rows, dec!(30)).unwrap();
        assert_eq!(rows[0].status, InstallmentStatus::Partial);
        allocate(&mut rows, dec!(70)).unwrap();
        assert_eq!(rows[0].status, InstallmentStatus::Paid);
        assert_eq!(rows[0].amount_paid, dec!(100));
    }

    #[test]
    fn test_paid_installments_are_skipped() {
        let mut rows = vec![installment(1, 10, dec!(100)), installment(2, 20, dec!(100))];
        rows[0].amount_paid = dec!(100);
        rows[0].status = InstallmentStatus::Paid;

        let outcome = allocate(&mut rows, dec!(60)).unwrap();
        assert_eq!(outcome.lines.len(), 1);
        assert_eq!(outcome.lines[0].installment_number, 2);
        assert_eq!(rows[0].amount_paid, dec!(100));
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let mut rows = vec![installment(1, 10, dec!(100))];
        assert!(allocate(&mut rows, dec!(0)).is_err());
        assert!(allocate(&mut rows, dec!(-10)).is_err());
    }

    #[test]
    fn test_nothing_outstanding_returns_full_remainder() {
        let mut rows = vec![installment(1, 10, dec!(100))];
        rows[0].amount_paid = dec!(100);
        rows[0].status = InstallmentStatus::Paid;
        let outcome = allocate(&mut rows, dec!(40)).unwrap();
        assert_eq!(outcome.allocated, dec!(0));
        assert_eq!(outcome.remainder, dec!(40));
        assert!(outcome.lines.is_empty());
    }
}
