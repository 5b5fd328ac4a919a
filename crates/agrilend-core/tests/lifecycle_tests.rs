use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use agrilend_core::accrual::OverdueAccrualProcessor;
use agrilend_core::error::{GatewayError, LendingError};
use agrilend_core::gateway::{
    CollectionRequest, GatewayScope, GatewayTransferStatus, MobileMoneyGateway, TransferRequest,
    TransferStatusResponse,
};
use agrilend_core::ledger::{LoanApplication, LoanLedger, RiskConfig};
use agrilend_core::loan::{Loan, LoanStatus};
use agrilend_core::notify::NotificationSink;
use agrilend_core::payments::PaymentService;
use agrilend_core::product::{LoanProduct, ScheduleType};
use agrilend_core::reconcile::{
    PollPolicy, ReconcileOutcome, ReconciliationCoordinator, StatusPoller, WebhookAck,
};
use agrilend_core::schedule::{InstallmentStatus, NoHarvestCalendar};
use agrilend_core::scoring::FixedScorer;
use agrilend_core::store::{LedgerStore, LoanLocks, MemoryStore};
use agrilend_core::transaction::TransactionStatus;
use agrilend_core::types::{Currency, FarmerId, Money, Msisdn, ProductId};

// ===========================================================================
// Fixtures
// ===========================================================================

/// Gateway stub: records submissions, answers status checks with a
/// configurable status, optionally refuses submissions outright.
struct StubGateway {
    transfers: Mutex<Vec<TransferRequest>>,
    collections: Mutex<Vec<CollectionRequest>>,
    reported_status: Mutex<GatewayTransferStatus>,
    refuse_submissions: std::sync::atomic::AtomicBool,
}

impl StubGateway {
    fn new() -> Self {
        Self {
            transfers: Mutex::new(Vec::new()),
            collections: Mutex::new(Vec::new()),
            reported_status: Mutex::new(GatewayTransferStatus::Pending),
            refuse_submissions: std::sync::atomic::AtomicBool::new(false),
        }
    }

    async fn report(&self, status: GatewayTransferStatus) {
        *self.reported_status.lock().await = status;
    }
}

#[async_trait]
impl MobileMoneyGateway for StubGateway {
    async fn transfer(&self, request: &TransferRequest) -> Result<(), GatewayError> {
        if self.refuse_submissions.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 500,
                body: "INTERNAL_PROCESSING_ERROR".into(),
            });
        }
        self.transfers.lock().await.push(request.clone());
        Ok(())
    }

    async fn request_to_pay(&self, request: &CollectionRequest) -> Result<(), GatewayError> {
        if self.refuse_submissions.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 500,
                body: "INTERNAL_PROCESSING_ERROR".into(),
            });
        }
        self.collections.lock().await.push(request.clone());
        Ok(())
    }

    async fn status(
        &self,
        _scope: GatewayScope,
        _reference: &str,
    ) -> Result<TransferStatusResponse, GatewayError> {
        Ok(TransferStatusResponse {
            status: *self.reported_status.lock().await,
            reason: None,
            financial_transaction_id: None,
        })
    }
}

/// Sink counting deliveries, for the at-most-once reminder window.
#[derive(Default)]
struct CountingSink {
    sent: AtomicUsize,
}

#[async_trait]
impl NotificationSink for CountingSink {
    async fn send(&self, _phone: &Msisdn, _message: &str) -> Result<(), LendingError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Engine {
    store: Arc<MemoryStore>,
    gateway: Arc<StubGateway>,
    sink: Arc<CountingSink>,
    ledger: LoanLedger,
    payments: PaymentService,
    coordinator: Arc<ReconciliationCoordinator>,
    poller: StatusPoller,
    accrual: OverdueAccrualProcessor,
}

fn engine() -> Engine {
    let store = Arc::new(MemoryStore::new());
    let locks = Arc::new(LoanLocks::default());
    let gateway = Arc::new(StubGateway::new());
    let sink = Arc::new(CountingSink::default());

    let store_dyn: Arc<dyn LedgerStore> = Arc::clone(&store) as Arc<dyn LedgerStore>;
    let sink_dyn: Arc<dyn NotificationSink> = Arc::clone(&sink) as Arc<dyn NotificationSink>;

    let ledger = LoanLedger::new(
        Arc::clone(&store_dyn),
        Arc::clone(&locks),
        Arc::new(FixedScorer(75)),
        Arc::clone(&sink_dyn),
        RiskConfig::default(),
    );
    let payments = PaymentService::new(
        Arc::clone(&store_dyn),
        Arc::clone(&locks),
        Arc::clone(&gateway) as Arc<dyn MobileMoneyGateway>,
        Arc::clone(&sink_dyn),
        Currency::EUR,
    );
    let coordinator = Arc::new(ReconciliationCoordinator::new(
        Arc::clone(&store_dyn),
        Arc::clone(&locks),
        Arc::clone(&sink_dyn),
        Arc::new(NoHarvestCalendar),
        Currency::EUR,
    ));
    let poller = StatusPoller::new(
        Arc::clone(&gateway) as Arc<dyn MobileMoneyGateway>,
        Arc::clone(&coordinator),
    );
    let accrual = OverdueAccrualProcessor::new(
        Arc::clone(&store_dyn),
        Arc::clone(&locks),
        Arc::clone(&sink_dyn),
        Currency::EUR,
    );

    Engine {
        store,
        gateway,
        sink,
        ledger,
        payments,
        coordinator,
        poller,
        accrual,
    }
}

fn fixed_product() -> LoanProduct {
    LoanProduct {
        id: ProductId::new(),
        name: "Seed Loan".into(),
        min_amount: dec!(100),
        max_amount: dec!(1000),
        interest_rate: dec!(15),
        duration_days: 30,
        schedule_type: ScheduleType::Fixed,
        grace_period_days: 0,
        is_active: true,
        created_at: Utc::now(),
    }
}

fn application(product_id: ProductId, amount: Money) -> LoanApplication {
    LoanApplication {
        farmer_id: FarmerId::new(),
        product_id,
        phone: Msisdn::new("+250788123456").unwrap(),
        amount,
    }
}

/// Drive a loan through application, approval and a confirmed disbursement.
async fn disbursed_loan(env: &Engine, product: &LoanProduct, amount: Money) -> Loan {
    env.store.insert_product(product.clone()).await.unwrap();
    let loan = env.ledger.apply(application(product.id, amount)).await.unwrap();
    env.ledger.approve(loan.id, None).await.unwrap();
    let tx = env.payments.initiate_disbursement(loan.id).await.unwrap();
    let outcome = env
        .coordinator
        .reconcile(&tx.external_reference, GatewayTransferStatus::Successful)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied);
    env.store.loan(loan.id).await.unwrap()
}

// ===========================================================================
// Scenario A: apply -> approve -> disburse -> webhook -> schedule
// ===========================================================================

#[tokio::test]
async fn test_full_disbursement_flow_generates_schedule() {
    let env = engine();
    let product = fixed_product();
    env.store.insert_product(product.clone()).await.unwrap();

    let loan = env.ledger.apply(application(product.id, dec!(500))).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Pending);

    let loan = env.ledger.approve(loan.id, Some(dec!(500))).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Approved);

    let tx = env.payments.initiate_disbursement(loan.id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(env.gateway.transfers.lock().await.len(), 1);

    // Webhook reports SUCCESSFUL.
    let ack = env
        .coordinator
        .handle_webhook(json!({
            "external_id": tx.external_reference,
            "amount": "500.00",
            "payer_phone": "250788123456",
            "status": "SUCCESSFUL"
        }))
        .await;
    assert_eq!(ack, WebhookAck::Accepted(ReconcileOutcome::Applied));

    let loan = env.store.loan(loan.id).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Disbursed);
    assert!(loan.disbursement_date.is_some());

    // Exactly one installment: 500 * (1 + 15%/12) = 506.25, due in 30 days.
    let rows = env.store.installments_for_loan(loan.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].amount, dec!(506.25));
    let due_in = rows[0].due_date - loan.disbursement_date.unwrap();
    assert_eq!(due_in.num_days(), 30);
}

#[tokio::test]
async fn test_disburse_pending_loan_is_rejected() {
    let env = engine();
    let product = fixed_product();
    env.store.insert_product(product.clone()).await.unwrap();

    let loan = env.ledger.apply(application(product.id, dec!(500))).await.unwrap();
    let err = env.payments.initiate_disbursement(loan.id).await.unwrap_err();
    assert!(matches!(err, LendingError::IllegalTransition { .. }));

    // Loan untouched, no gateway traffic.
    assert_eq!(env.store.loan(loan.id).await.unwrap().status, LoanStatus::Pending);
    assert!(env.gateway.transfers.lock().await.is_empty());
}

#[tokio::test]
async fn test_gateway_refusal_fails_transaction_not_loan() {
    let env = engine();
    let product = fixed_product();
    env.store.insert_product(product.clone()).await.unwrap();

    let loan = env.ledger.apply(application(product.id, dec!(500))).await.unwrap();
    env.ledger.approve(loan.id, None).await.unwrap();

    env.gateway.refuse_submissions.store(true, Ordering::SeqCst);
    let err = env.payments.initiate_disbursement(loan.id).await.unwrap_err();
    assert!(matches!(err, LendingError::Gateway(_)));

    // The transaction is FAILED; the loan is still APPROVED.
    let loan = env.store.loan(loan.id).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Approved);
}

#[tokio::test]
async fn test_failed_webhook_leaves_loan_approved() {
    let env = engine();
    let product = fixed_product();
    env.store.insert_product(product.clone()).await.unwrap();

    let loan = env.ledger.apply(application(product.id, dec!(500))).await.unwrap();
    env.ledger.approve(loan.id, None).await.unwrap();
    let tx = env.payments.initiate_disbursement(loan.id).await.unwrap();

    let outcome = env
        .coordinator
        .reconcile(&tx.external_reference, GatewayTransferStatus::Failed)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::MarkedFailed);

    let stored = env
        .store
        .transaction_by_reference(&tx.external_reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert_eq!(env.store.loan(loan.id).await.unwrap().status, LoanStatus::Approved);
    assert!(env.store.installments_for_loan(loan.id).await.unwrap().is_empty());
}

// ===========================================================================
// Scenario B: duplicate deliveries apply the repayment exactly once
// ===========================================================================

#[tokio::test]
async fn test_duplicate_deliveries_create_one_repayment() {
    let env = engine();
    let product = fixed_product();
    let loan = disbursed_loan(&env, &product, dec!(500)).await;

    let tx = env.payments.request_collection(loan.id, dec!(506.25)).await.unwrap();
    env.gateway.report(GatewayTransferStatus::Successful).await;

    // Webhook and poller race on the same reference.
    let webhook = env.coordinator.handle_webhook(json!({
        "transaction_id": tx.external_reference,
        "status": "SUCCESSFUL"
    }));
    let poll = env.poller.poll(
        GatewayScope::Collection,
        &tx.external_reference,
        PollPolicy::default(),
    );
    let (ack, polled) = tokio::join!(webhook, poll);

    // Both are recognised outcomes; exactly one applied the money.
    let outcomes = [
        match ack {
            WebhookAck::Accepted(outcome) => outcome,
            other => panic!("webhook not accepted: {other:?}"),
        },
        polled.unwrap(),
    ];
    assert!(outcomes.contains(&ReconcileOutcome::Applied));
    assert!(
        outcomes.contains(&ReconcileOutcome::Duplicate)
            || outcomes.iter().filter(|o| **o == ReconcileOutcome::Applied).count() == 1
    );

    let repayments = env.store.repayments_for_loan(loan.id).await.unwrap();
    assert_eq!(repayments.len(), 1);
    assert_eq!(repayments[0].amount, dec!(506.25));

    // The balance reflects the payment exactly once: 506.25 >= 500 -> PAID.
    let loan = env.store.loan(loan.id).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Paid);
    let rows = env.store.installments_for_loan(loan.id).await.unwrap();
    assert_eq!(rows[0].status, InstallmentStatus::Paid);
    assert_eq!(rows[0].amount_paid, dec!(506.25));
}

#[tokio::test]
async fn test_reconcile_twice_sequentially_is_idempotent() {
    let env = engine();
    let product = fixed_product();
    let loan = disbursed_loan(&env, &product, dec!(500)).await;

    let tx = env.payments.request_collection(loan.id, dec!(200)).await.unwrap();
    let first = env
        .coordinator
        .reconcile(&tx.external_reference, GatewayTransferStatus::Successful)
        .await
        .unwrap();
    let second = env
        .coordinator
        .reconcile(&tx.external_reference, GatewayTransferStatus::Successful)
        .await
        .unwrap();

    assert_eq!(first, ReconcileOutcome::Applied);
    assert_eq!(second, ReconcileOutcome::Duplicate);
    assert_eq!(env.store.repayments_for_loan(loan.id).await.unwrap().len(), 1);

    // Partial repayment: loan is ACTIVE with 300 outstanding.
    let loan = env.store.loan(loan.id).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Active);
    assert_eq!(loan.balance(dec!(200)), dec!(300));
}

#[tokio::test]
async fn test_unknown_reference_is_ignored() {
    let env = engine();
    let outcome = env
        .coordinator
        .reconcile("no-such-reference", GatewayTransferStatus::Successful)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::UnknownReference);

    // Still a 200 at the webhook: duplicates and foreign callbacks are
    // expected traffic.
    let ack = env
        .coordinator
        .handle_webhook(json!({"external_id": "no-such-reference", "status": "SUCCESSFUL"}))
        .await;
    assert_eq!(ack.http_status(), 200);
}

#[tokio::test]
async fn test_malformed_webhook_is_bad_request() {
    let env = engine();
    let ack = env.coordinator.handle_webhook(json!({"status": "SUCCESSFUL"})).await;
    assert_eq!(ack.http_status(), 400);

    let ack = env.coordinator.handle_webhook(json!("not an object")).await;
    assert_eq!(ack.http_status(), 400);
}

// ===========================================================================
// Scenario C: overdue accrual
// ===========================================================================

#[tokio::test]
async fn test_overdue_sweep_applies_capped_penalty() {
    let env = engine();
    let mut product = fixed_product();
    product.min_amount = dec!(100);
    product.max_amount = dec!(1000);
    let loan = disbursed_loan(&env, &product, dec!(1000)).await;

    // Backdate the only installment to 10 days ago and strip interest so the
    // numbers match the reference scenario: amount 1000, 10 days overdue.
    let mut rows = env.store.installments_for_loan(loan.id).await.unwrap();
    rows[0].due_date = Utc::now() - ChronoDuration::days(10);
    rows[0].principal_amount = dec!(1000);
    rows[0].interest_amount = dec!(0);
    rows[0].amount = dec!(1000);
    env.store.update_installment(&rows[0]).await.unwrap();

    let before = env.sink.sent.load(Ordering::SeqCst);
    let outcome = env.accrual.sweep(Utc::now()).await.unwrap();
    assert_eq!(outcome.installments_swept, 1);
    assert_eq!(outcome.reminders_sent, 1);

    // penalty = min(0.01 * 10, 0.30) * 1000 = 100
    let rows = env.store.installments_for_loan(loan.id).await.unwrap();
    assert_eq!(rows[0].penalty_amount, dec!(100));
    assert_eq!(rows[0].status, InstallmentStatus::Overdue);
    assert_eq!(env.store.loan(loan.id).await.unwrap().status, LoanStatus::Overdue);
    assert_eq!(env.sink.sent.load(Ordering::SeqCst), before + 1);

    // A second sweep inside the 24h window recomputes the penalty but sends
    // no second reminder.
    let outcome = env.accrual.sweep(Utc::now()).await.unwrap();
    assert_eq!(outcome.reminders_sent, 0);
    let rows = env.store.installments_for_loan(loan.id).await.unwrap();
    assert_eq!(rows[0].penalty_amount, dec!(100));
    assert_eq!(env.sink.sent.load(Ordering::SeqCst), before + 1);
}

#[tokio::test]
async fn test_overdue_payment_clears_penalty_and_reactivates() {
    let env = engine();
    let product = fixed_product();
    let loan = disbursed_loan(&env, &product, dec!(500)).await;

    let mut rows = env.store.installments_for_loan(loan.id).await.unwrap();
    rows[0].due_date = Utc::now() - ChronoDuration::days(5);
    env.store.update_installment(&rows[0]).await.unwrap();
    env.accrual.sweep(Utc::now()).await.unwrap();

    // 5 days on 506.25: penalty = 506.25 * 0.05 = 25.31 (cents)
    let rows = env.store.installments_for_loan(loan.id).await.unwrap();
    assert_eq!(rows[0].penalty_amount, dec!(25.31));
    assert_eq!(env.store.loan(loan.id).await.unwrap().status, LoanStatus::Overdue);

    // Paying amount + penalty settles the installment and the loan.
    let tx = env.payments.request_collection(loan.id, dec!(531.56)).await.unwrap();
    env.coordinator
        .reconcile(&tx.external_reference, GatewayTransferStatus::Successful)
        .await
        .unwrap();

    let rows = env.store.installments_for_loan(loan.id).await.unwrap();
    assert_eq!(rows[0].status, InstallmentStatus::Paid);
    assert_eq!(env.store.loan(loan.id).await.unwrap().status, LoanStatus::Paid);
}
