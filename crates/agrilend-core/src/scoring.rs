use async_trait::async_trait;
use std::sync::Arc;

use crate::error::LendingResult;
use crate::loan::LoanStatus;
use crate::store::LedgerStore;
use crate::types::FarmerId;

/// Produces an opaque 0-100 creditworthiness score, consumed at application
/// time. Real scoring models live outside the engine.
#[async_trait]
pub trait CreditScorer: Send + Sync {
    async fn score(&self, farmer_id: FarmerId) -> LendingResult<u8>;
}

/// Scorer that always returns the same value. Useful in tests and for
/// products without scoring requirements.
pub struct FixedScorer(pub u8);

#[async_trait]
impl CreditScorer for FixedScorer {
    async fn score(&self, _farmer_id: FarmerId) -> LendingResult<u8> {
        Ok(self.0)
    }
}

const BASE_SCORE: i64 = 50;
const PAID_LOAN_POINTS: i64 = 10;
const PAID_LOAN_CAP: i64 = 30;
const DEFAULT_PENALTY_POINTS: i64 = 20;
const DEFAULT_PENALTY_CAP: i64 = 40;
const ON_TIME_POINTS: i64 = 5;
const ON_TIME_CAP: i64 = 15;

/// Reference scorer built from the farmer's repayment history: rewards
/// previously paid loans and on-time repayments, penalises defaults.
pub struct HistoryScorer {
    store: Arc<dyn LedgerStore>,
}

impl HistoryScorer {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CreditScorer for HistoryScorer {
    async fn score(&self, farmer_id: FarmerId) -> LendingResult<u8> {
        let loans = self.store.loans_for_farmer(farmer_id).await?;
        let mut score = BASE_SCORE;

        let paid = loans.iter().filter(|l| l.status == LoanStatus::Paid).count() as i64;
        score += (paid * PAID_LOAN_POINTS).min(PAID_LOAN_CAP);

        let defaulted = loans
            .iter()
            .filter(|l| l.status == LoanStatus::Defaulted)
            .count() as i64;
        score -= (defaulted * DEFAULT_PENALTY_POINTS).min(DEFAULT_PENALTY_CAP);

        let mut on_time = 0i64;
        for loan in &loans {
            let Some(due) = loan.due_date else { continue };
            let repayments = self.store.repayments_for_loan(loan.id).await?;
            on_time += repayments.iter().filter(|r| r.payment_date <= due).count() as i64;
        }
        score += (on_time * ON_TIME_POINTS).min(ON_TIME_CAP);

        Ok(score.clamp(0, 100) as u8)
    }
}
