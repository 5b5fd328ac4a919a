use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{LendingError, LendingResult};
use crate::gateway::{CollectionRequest, MobileMoneyGateway, Party, TransferRequest};
use crate::loan::LoanStatus;
use crate::notify::{messages, send_quietly, NotificationSink};
use crate::store::{LedgerStore, LoanLocks};
use crate::transaction::{Transaction, TransactionKind};
use crate::types::{Currency, LoanId, Money};

const DISBURSEMENT_PAYER_MESSAGE: &str = "Loan Disbursement";
const DISBURSEMENT_PAYEE_NOTE: &str = "Farm Loan";
const COLLECTION_PAYER_MESSAGE: &str = "Loan Repayment";
const COLLECTION_PAYEE_NOTE: &str = "Farm Loan Repayment";

/// Initiates outbound money movement: disbursement transfers and
/// collection requests.
///
/// Every attempt creates a PENDING `Transaction` carrying a fresh UUID as
/// its external reference before the gateway is called; the terminal
/// outcome only ever arrives through the reconciliation coordinator. A
/// gateway failure marks the transaction FAILED and leaves the loan
/// untouched.
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    locks: Arc<LoanLocks>,
    gateway: Arc<dyn MobileMoneyGateway>,
    notifications: Arc<dyn NotificationSink>,
    currency: Currency,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        locks: Arc<LoanLocks>,
        gateway: Arc<dyn MobileMoneyGateway>,
        notifications: Arc<dyn NotificationSink>,
        currency: Currency,
    ) -> Self {
        Self {
            store,
            locks,
            gateway,
            notifications,
            currency,
        }
    }

    /// Push the approved amount to the borrower's mobile-money account.
    /// Requires an APPROVED loan.
    pub async fn initiate_disbursement(&self, loan_id: LoanId) -> LendingResult<Transaction> {
        let _guard = self.locks.acquire(loan_id).await?;
        let mut loan = self.store.loan(loan_id).await?;
        if loan.status != LoanStatus::Approved {
            return Err(LendingError::IllegalTransition {
                from: loan.status,
                to: LoanStatus::Disbursed,
            });
        }
        let amount = loan.approved_amount()?;

        let reference = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tx = Transaction::new(
            loan.id,
            TransactionKind::Disbursement,
            amount,
            self.currency.clone(),
            reference.clone(),
            loan.phone.clone(),
            now,
        );
        self.store.insert_transaction(tx.clone()).await?;

        let request = TransferRequest {
            amount,
            currency: self.currency.to_string(),
            external_id: reference.clone(),
            payee: Party::msisdn(&loan.phone),
            payer_message: DISBURSEMENT_PAYER_MESSAGE.to_string(),
            payee_note: DISBURSEMENT_PAYEE_NOTE.to_string(),
        };

        if let Err(e) = self.gateway.transfer(&request).await {
            tx.mark_failed(Utc::now());
            self.store.update_transaction(&tx).await?;
            warn!(loan_id = %loan.id, %reference, error = %e, "disbursement submission failed");
            return Err(e.into());
        }

        loan.gateway_reference = Some(reference.clone());
        self.store.update_loan(&loan).await?;
        info!(loan_id = %loan.id, %reference, %amount, "disbursement submitted");

        send_quietly(
            self.notifications.as_ref(),
            &loan.phone,
            &messages::disbursement_in_progress(amount, &self.currency),
        )
        .await;
        Ok(tx)
    }

    /// Ask the borrower's wallet for a repayment of `amount`.
    pub async fn request_collection(
        &self,
        loan_id: LoanId,
        amount: Money,
    ) -> LendingResult<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(LendingError::validation(format!(
                "collection amount must be positive, got {}",
                amount
            )));
        }

        let _guard = self.locks.acquire(loan_id).await?;
        let loan = self.store.loan(loan_id).await?;
        if !matches!(
            loan.status,
            LoanStatus::Disbursed | LoanStatus::Active | LoanStatus::Overdue
        ) {
            return Err(LendingError::validation(format!(
                "loan in status {} has nothing to collect against",
                loan.status
            )));
        }

        let reference = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tx = Transaction::new(
            loan.id,
            TransactionKind::Repayment,
            amount,
            self.currency.clone(),
            reference.clone(),
            loan.phone.clone(),
            now,
        );
        self.store.insert_transaction(tx.clone()).await?;

        let request = CollectionRequest {
            amount,
            currency: self.currency.to_string(),
            external_id: reference.clone(),
            payer: Party::msisdn(&loan.phone),
            payer_message: COLLECTION_PAYER_MESSAGE.to_string(),
            payee_note: COLLECTION_PAYEE_NOTE.to_string(),
        };

        if let Err(e) = self.gateway.request_to_pay(&request).await {
            tx.mark_failed(Utc::now());
            self.store.update_transaction(&tx).await?;
            warn!(loan_id = %loan.id, %reference, error = %e, "collection submission failed");
            return Err(e.into());
        }

        info!(loan_id = %loan.id, %reference, %amount, "collection requested");
        Ok(tx)
    }
}
