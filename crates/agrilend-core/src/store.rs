use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{LendingError, LendingResult};
use crate::loan::Loan;
use crate::product::LoanProduct;
use crate::schedule::Installment;
use crate::transaction::{LoanRepayment, Transaction};
use crate::types::{FarmerId, LoanId, ProductId};

/// Persistence seam for the five ledger tables.
///
/// The engine only ever touches storage through this trait; relational
/// backends implement it behind the plumbing boundary. Each method is
/// individually atomic; multi-row consistency comes from the caller holding
/// the owning loan's lock (see [`LoanLocks`]) for the whole operation.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_loan(&self, loan: Loan) -> LendingResult<()>;
    async fn loan(&self, id: LoanId) -> LendingResult<Loan>;
    async fn update_loan(&self, loan: &Loan) -> LendingResult<()>;
    async fn loans_for_farmer(&self, farmer_id: FarmerId) -> LendingResult<Vec<Loan>>;

    async fn insert_product(&self, product: LoanProduct) -> LendingResult<()>;
    async fn product(&self, id: ProductId) -> LendingResult<LoanProduct>;

    /// Fails if the external reference is already taken: the uniqueness of
    /// the idempotency key is enforced at the store.
    async fn insert_transaction(&self, tx: Transaction) -> LendingResult<()>;
    async fn transaction_by_reference(&self, reference: &str)
        -> LendingResult<Option<Transaction>>;
    async fn update_transaction(&self, tx: &Transaction) -> LendingResult<()>;

    async fn insert_repayment(&self, repayment: LoanRepayment) -> LendingResult<()>;
    async fn repayment_exists(&self, reference: &str) -> LendingResult<bool>;
    async fn repayments_for_loan(&self, loan_id: LoanId) -> LendingResult<Vec<LoanRepayment>>;

    async fn schedule_exists(&self, loan_id: LoanId) -> LendingResult<bool>;
    /// Bulk insert of a fresh plan. Fails if any schedule already exists for
    /// the loan; paired with `schedule_exists` this is the at-most-once
    /// generation guard.
    async fn insert_installments(&self, rows: Vec<Installment>) -> LendingResult<()>;
    /// Ordered by due date ascending.
    async fn installments_for_loan(&self, loan_id: LoanId) -> LendingResult<Vec<Installment>>;
    async fn update_installment(&self, row: &Installment) -> LendingResult<()>;
    /// Outstanding installments past due as of `as_of`, across all loans.
    async fn overdue_candidates(&self, as_of: DateTime<Utc>) -> LendingResult<Vec<Installment>>;
}

#[derive(Default)]
struct MemoryInner {
    loans: HashMap<LoanId, Loan>,
    products: HashMap<ProductId, LoanProduct>,
    transactions: HashMap<String, Transaction>,
    repayments: Vec<LoanRepayment>,
    installments: HashMap<LoanId, Vec<Installment>>,
}

/// In-memory reference implementation of [`LedgerStore`], used by the
/// engine's tests and by simulations.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_loan(&self, loan: Loan) -> LendingResult<()> {
        let mut inner = self.inner.write().await;
        if inner.loans.contains_key(&loan.id) {
            return Err(LendingError::Store(format!("loan {} already exists", loan.id)));
        }
        inner.loans.insert(loan.id, loan);
        Ok(())
    }

    async fn loan(&self, id: LoanId) -> LendingResult<Loan> {
        self.inner
            .read()
            .await
            .loans
            .get(&id)
            .cloned()
            .ok_or_else(|| LendingError::not_found("loan", id))
    }

    async fn update_loan(&self, loan: &Loan) -> LendingResult<()> {
        let mut inner = self.inner.write().await;
        match inner.loans.get_mut(&loan.id) {
            Some(existing) => {
                *existing = loan.clone();
                Ok(())
            }
            None => Err(LendingError::not_found("loan", loan.id)),
        }
    }

    async fn loans_for_farmer(&self, farmer_id: FarmerId) -> LendingResult<Vec<Loan>> {
        Ok(self
            .inner
            .read()
            .await
            .loans
            .values()
            .filter(|l| l.farmer_id == farmer_id)
            .cloned()
            .collect())
    }

    async fn insert_product(&self, product: LoanProduct) -> LendingResult<()> {
        self.inner.write().await.products.insert(product.id, product);
        Ok(())
    }

    async fn product(&self, id: ProductId) -> LendingResult<LoanProduct> {
        self.inner
            .read()
            .await
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| LendingError::not_found("loan product", id))
    }

    async fn insert_transaction(&self, tx: Transaction) -> LendingResult<()> {
        let mut inner = self.inner.write().await;
        if inner.transactions.contains_key(&tx.external_reference) {
            return Err(LendingError::Store(format!(
                "external reference {} already exists",
                tx.external_reference
            )));
        }
        inner.transactions.insert(tx.external_reference.clone(), tx);
        Ok(())
    }

    async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> LendingResult<Option<Transaction>> {
        Ok(self.inner.read().await.transactions.get(reference).cloned())
    }

    async fn update_transaction(&self, tx: &Transaction) -> LendingResult<()> {
        let mut inner = self.inner.write().await;
        match inner.transactions.get_mut(&tx.external_reference) {
            Some(existing) => {
                *existing = tx.clone();
                Ok(())
            }
            None => Err(LendingError::not_found("transaction", &tx.external_reference)),
        }
    }

    async fn insert_repayment(&self, repayment: LoanRepayment) -> LendingResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .repayments
            .iter()
            .any(|r| r.external_reference == repayment.external_reference)
        {
            return Err(LendingError::Store(format!(
                "repayment for reference {} already recorded",
                repayment.external_reference
            )));
        }
        inner.repayments.push(repayment);
        Ok(())
    }

    async fn repayment_exists(&self, reference: &str) -> LendingResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .repayments
            .iter()
            .any(|r| r.external_reference == reference))
    }

    async fn repayments_for_loan(&self, loan_id: LoanId) -> LendingResult<Vec<LoanRepayment>> {
        Ok(self
            .inner
            .read()
            .await
            .repayments
            .iter()
            .filter(|r| r.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn schedule_exists(&self, loan_id: LoanId) -> LendingResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .installments
            .get(&loan_id)
            .map(|rows| !rows.is_empty())
            .unwrap_or(false))
    }

    async fn insert_installments(&self, rows: Vec<Installment>) -> LendingResult<()> {
        let loan_id = match rows.first() {
            Some(first) => first.loan_id,
            None => return Ok(()),
        };
        let mut inner = self.inner.write().await;
        let slot = inner.installments.entry(loan_id).or_default();
        if !slot.is_empty() {
            return Err(LendingError::Store(format!(
                "schedule for loan {} already exists",
                loan_id
            )));
        }
        slot.extend(rows);
        slot.sort_by_key(|r| (r.due_date, r.installment_number));
        Ok(())
    }

    async fn installments_for_loan(&self, loan_id: LoanId) -> LendingResult<Vec<Installment>> {
        let mut rows = self
            .inner
            .read()
            .await
            .installments
            .get(&loan_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|r| (r.due_date, r.installment_number));
        Ok(rows)
    }

    async fn update_installment(&self, row: &Installment) -> LendingResult<()> {
        let mut inner = self.inner.write().await;
        let rows = inner
            .installments
            .get_mut(&row.loan_id)
            .ok_or_else(|| LendingError::not_found("payment schedule", row.loan_id))?;
        match rows
            .iter_mut()
            .find(|r| r.installment_number == row.installment_number)
        {
            Some(existing) => {
                *existing = row.clone();
                Ok(())
            }
            None => Err(LendingError::not_found(
                "installment",
                format!("{}#{}", row.loan_id, row.installment_number),
            )),
        }
    }

    async fn overdue_candidates(&self, as_of: DateTime<Utc>) -> LendingResult<Vec<Installment>> {
        Ok(self
            .inner
            .read()
            .await
            .installments
            .values()
            .flatten()
            .filter(|r| r.status.is_outstanding() && r.due_date < as_of)
            .cloned()
            .collect())
    }
}

/// Per-loan exclusive lock registry: the single serialization point for all
/// loan-mutating operations. Two concurrent reconciliations for the same
/// loan execute strictly one after the other; the second observes the
/// first's terminal-state marker and no-ops.
pub struct LoanLocks {
    locks: std::sync::Mutex<HashMap<LoanId, Arc<Mutex<()>>>>,
    acquire_timeout: Duration,
}

/// Held for the duration of a loan-mutating operation.
#[derive(Debug)]
pub struct LoanGuard {
    _guard: OwnedMutexGuard<()>,
}

impl LoanLocks {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            locks: std::sync::Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    /// Acquire the exclusive lock for a loan, waiting at most the configured
    /// timeout before surfacing a retryable contention error.
    pub async fn acquire(&self, loan_id: LoanId) -> LendingResult<LoanGuard> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| LendingError::Store("loan lock registry poisoned".into()))?;
            Arc::clone(locks.entry(loan_id).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        match tokio::time::timeout(self.acquire_timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(LoanGuard { _guard: guard }),
            Err(_) => Err(LendingError::LockContention(loan_id)),
        }
    }
}

impl Default for LoanLocks {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}
