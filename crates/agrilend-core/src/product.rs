use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LendingError, LendingResult};
use crate::types::{Money, ProductId, Rate};

/// How the installment plan for a product is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleType {
    /// Equal-principal installments every 30 days.
    Fixed,
    /// Installments aligned to harvest dates plus a grace period.
    Harvest,
    /// Caller supplies the plan explicitly.
    Custom,
}

/// Predefined loan product terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanProduct {
    pub id: ProductId,
    pub name: String,
    pub min_amount: Money,
    pub max_amount: Money,
    /// Annual interest rate as a percentage (15 = 15% APR).
    pub interest_rate: Rate,
    pub duration_days: i64,
    pub schedule_type: ScheduleType,
    /// Days after a harvest date before a harvest-aligned installment is due.
    pub grace_period_days: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl LoanProduct {
    /// Monthly interest rate as a decimal fraction (15% APR -> 0.0125).
    pub fn monthly_rate(&self) -> Rate {
        self.interest_rate / Decimal::ONE_HUNDRED / Decimal::from(12)
    }

    /// Validate a requested amount against the product bounds.
    pub fn validate_amount(&self, amount: Money) -> LendingResult<()> {
        if amount < self.min_amount || amount > self.max_amount {
            return Err(LendingError::validation(format!(
                "requested amount {} is outside product limits ({} - {})",
                amount, self.min_amount, self.max_amount
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_product() -> LoanProduct {
        LoanProduct {
            id: ProductId::new(),
            name: "Seed Loan".into(),
            min_amount: dec!(100),
            max_amount: dec!(1000),
            interest_rate: dec!(15),
            duration_days: 90,
            schedule_type: ScheduleType::Fixed,
            grace_period_days: 0,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_monthly_rate() {
        // 15% APR / 12 = 1.25% per month
        assert_eq!(sample_product().monthly_rate(), dec!(0.0125));
    }

    #[test]
    fn test_amount_bounds() {
        let product = sample_product();
        assert!(product.validate_amount(dec!(100)).is_ok());
        assert!(product.validate_amount(dec!(1000)).is_ok());
        assert!(product.validate_amount(dec!(99.99)).is_err());
        assert!(product.validate_amount(dec!(1000.01)).is_err());
    }
}
