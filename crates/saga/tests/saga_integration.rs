//! Integration tests for the payment fulfillment saga.

use common::{PaymentEvent, ProductItem, TransactionId, UserId};
use rust_decimal_macros::dec;
use saga::{InMemorySagaJournal, SagaCoordinator, SagaError, SagaOutcome, SagaState};
use services::{
    CallLog, InMemoryOrderService, InMemoryProductService, InMemoryReceiptService,
    InMemoryUserService,
};

type TestCoordinator = SagaCoordinator<
    InMemoryReceiptService,
    InMemoryOrderService,
    InMemoryProductService,
    InMemoryUserService,
    InMemorySagaJournal,
>;

struct TestHarness {
    coordinator: TestCoordinator,
    receipts: InMemoryReceiptService,
    orders: InMemoryOrderService,
    products: InMemoryProductService,
    users: InMemoryUserService,
    log: CallLog,
}

impl TestHarness {
    fn new() -> Self {
        let log = CallLog::new();
        let receipts = InMemoryReceiptService::with_log(log.clone());
        let orders = InMemoryOrderService::with_log(log.clone());
        let products = InMemoryProductService::with_log(log.clone());
        let users = InMemoryUserService::with_log(log.clone());

        products.set_stock("widget", 5);
        products.set_stock("gadget", 1);
        users.add_user("alice", dec!(0));
        users.add_user("bob", dec!(0));

        let coordinator = SagaCoordinator::new(
            receipts.clone(),
            orders.clone(),
            products.clone(),
            users.clone(),
            InMemorySagaJournal::new(),
        );

        Self {
            coordinator,
            receipts,
            orders,
            products,
            users,
            log,
        }
    }

    fn payment(&self, user: &str, transaction: &str, items: Vec<ProductItem>) -> PaymentEvent {
        PaymentEvent {
            user_id: UserId::new(user),
            transaction_id: TransactionId::new(transaction),
            amount: dec!(49.995),
            currency: "USD".to_string(),
            current_exchange_rate: dec!(2),
            payment_method: "card".to_string(),
            payment_gateway: "stripe".to_string(),
            product_list: items,
        }
    }
}

#[tokio::test]
async fn test_happy_path_full_payment_fulfillment() {
    let h = TestHarness::new();
    let event = h.payment(
        "alice",
        "tx-1",
        vec![ProductItem::new("widget", 2), ProductItem::new("gadget", 1)],
    );

    let outcome = h.coordinator.execute(&event).await.unwrap();

    let SagaOutcome::Completed { receipt_id, order_id } = outcome else {
        panic!("Expected a completed saga");
    };
    let receipt = h.receipts.for_transaction(&event.transaction_id).unwrap();
    assert_eq!(receipt.id, receipt_id);
    assert_eq!(receipt.amount, dec!(49.995));
    assert!(!h.orders.is_deleted(&order_id));
    assert_eq!(h.products.stock("widget"), Some(3));
    assert_eq!(h.products.stock("gadget"), Some(0));
    assert!(h.users.refunds().is_empty());

    let saga = h
        .coordinator
        .get_saga(&event.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saga.state(), SagaState::Completed);
    assert_eq!(saga.receipt_id(), Some(&receipt_id));
    assert_eq!(saga.order_id(), Some(&order_id));
}

#[tokio::test]
async fn test_stock_runs_out_on_second_payment() {
    let h = TestHarness::new();

    h.coordinator
        .execute(&h.payment("alice", "tx-1", vec![ProductItem::new("gadget", 1)]))
        .await
        .unwrap();
    let err = h
        .coordinator
        .execute(&h.payment("bob", "tx-2", vec![ProductItem::new("gadget", 1)]))
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::StepFailed { step: "adjust_inventory", .. }));
    assert_eq!(h.receipts.active_count(), 1);
    assert_eq!(h.orders.active_count(), 1);
    assert_eq!(h.receipts.created_count(), 2);
    // 49.995 * 2 = 99.99
    assert_eq!(h.users.refunds(), vec![(UserId::new("bob"), dec!(99.99))]);
    assert_eq!(h.users.balance("alice"), Some(dec!(0)));
}

#[tokio::test]
async fn test_compensation_runs_after_failed_step_and_before_refund() {
    let h = TestHarness::new();
    let event = h.payment("alice", "tx-1", vec![ProductItem::new("ghost", 1)]);

    let err = h.coordinator.execute(&event).await.unwrap_err();

    assert!(err.to_string().contains("Invalid product"));
    let calls = h.log.calls();
    let position = |pattern: &str| calls.iter().position(|c| c == pattern).unwrap();
    assert!(position("order.delete") < position("receipt.delete"));
    assert!(position("receipt.delete") < position("user.update-balance"));
    assert_eq!(h.log.count("user.update-balance"), 1);
}

#[tokio::test]
async fn test_redelivery_of_failed_payment_is_not_fulfilled_again() {
    let h = TestHarness::new();
    let event = h.payment("alice", "tx-1", vec![ProductItem::new("widget", 9)]);

    h.coordinator.execute(&event).await.unwrap_err();
    let outcome = h.coordinator.execute(&event).await.unwrap();

    assert!(matches!(outcome, SagaOutcome::AlreadyProcessed { .. }));
    assert_eq!(h.users.refunds().len(), 1);
    assert_eq!(h.orders.created_count(), 1);
    assert_eq!(h.products.stock("widget"), Some(5));

    let saga = h
        .coordinator
        .get_saga(&event.transaction_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saga.state(), SagaState::Duplicate);
}

#[tokio::test]
async fn test_multiple_independent_sagas() {
    let h = TestHarness::new();

    for n in 1..=3 {
        let event = h.payment("alice", &format!("tx-{n}"), vec![ProductItem::new("widget", 1)]);
        h.coordinator.execute(&event).await.unwrap();
    }

    assert_eq!(h.receipts.active_count(), 3);
    assert_eq!(h.orders.active_count(), 3);
    assert_eq!(h.products.stock("widget"), Some(2));
    assert!(h.coordinator.incomplete_sagas().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_one_saga_fails_other_succeeds() {
    let h = TestHarness::new();

    h.orders.set_fail_on_create(true);
    let failed = h
        .coordinator
        .execute(&h.payment("alice", "tx-1", vec![ProductItem::new("widget", 1)]))
        .await;
    h.orders.set_fail_on_create(false);
    let succeeded = h
        .coordinator
        .execute(&h.payment("bob", "tx-2", vec![ProductItem::new("widget", 1)]))
        .await;

    assert!(failed.is_err());
    assert!(matches!(succeeded, Ok(SagaOutcome::Completed { .. })));
    assert_eq!(h.products.stock("widget"), Some(4));
    assert_eq!(h.users.refunds(), vec![(UserId::new("alice"), dec!(99.99))]);
}
