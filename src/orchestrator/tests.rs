use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use kameo::Actor;

use super::*;
use crate::actors::DlqActor;
use crate::clients::StaticCatalog;
use crate::idempotency::{IdempotencyError, MemoryIdempotencyStore};
use crate::messaging::InMemoryPublisher;
use crate::store::MemoryOrderStore;
use crate::utils::{IsTransient, RetryConfig};

const USER: i64 = 7;

struct Harness {
    orchestrator: OrderOrchestrator,
    store: Arc<MemoryOrderStore>,
    idempotency: Arc<MemoryIdempotencyStore>,
    publisher: Arc<InMemoryPublisher>,
    catalog: Arc<StaticCatalog>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_catalog(StaticCatalog::new(), DEFAULT_MAX_CONCURRENT_CHECKS).await
    }

    async fn with_catalog(catalog: StaticCatalog, max_concurrent_checks: usize) -> Self {
        Self::build(
            catalog,
            max_concurrent_checks,
            |store| store as Arc<dyn OrderStore>,
            |idempotency| idempotency as Arc<dyn IdempotencyStore>,
        )
        .await
    }

    /// Harness whose orchestrator sees the stores through the given wrappers.
    async fn build(
        catalog: StaticCatalog,
        max_concurrent_checks: usize,
        wrap_store: impl FnOnce(Arc<MemoryOrderStore>) -> Arc<dyn OrderStore>,
        wrap_idempotency: impl FnOnce(Arc<MemoryIdempotencyStore>) -> Arc<dyn IdempotencyStore>,
    ) -> Self {
        let store = Arc::new(MemoryOrderStore::new(2));
        let idempotency = Arc::new(MemoryIdempotencyStore::new(Duration::from_secs(60)));
        let publisher = Arc::new(InMemoryPublisher::new());
        let catalog = Arc::new(catalog);

        // product 1: 20 per unit, markup 2, discount 1
        // product 2: 50 per unit, markup 5
        catalog.set_product(1, 100, 2.0, 1.0, 20.0).await;
        catalog.set_product(2, 10, 5.0, 0.0, 50.0).await;

        let dlq = DlqActor::spawn(DlqActor::new(None, None));
        let relay = OutboxRelay::spawn(
            OutboxRelay::new(publisher.clone(), dlq).with_retry_config(RetryConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            }),
        );

        let orchestrator = OrderOrchestrator::new(
            wrap_store(store.clone()),
            wrap_idempotency(idempotency.clone()),
            catalog.clone(),
            catalog.clone(),
            publisher.clone(),
        )
        .with_relay(relay)
        .with_max_concurrent_checks(max_concurrent_checks);

        Self {
            orchestrator,
            store,
            idempotency,
            publisher,
            catalog,
        }
    }

    async fn create(&self, key: &str) -> Result<OrderOutcome, OrderError> {
        self.orchestrator.create_order(&ctx(), standard_order(key)).await
    }
}

fn ctx() -> RequestContext {
    RequestContext::new(USER, "token")
}

fn standard_order(key: &str) -> CreateOrder {
    CreateOrder {
        idempotency_key: key.to_string(),
        line_items: vec![
            LineItemRequest { product_id: 1, quantity: 3 },
            LineItemRequest { product_id: 2, quantity: 1 },
        ],
    }
}

fn set_status(order_id: i64, status: OrderStatus) -> UpdateOrder {
    UpdateOrder {
        order_id,
        status,
        line_items: None,
    }
}

/// Commits like the memory store, then holds the acknowledgement back.
struct SlowAckStore {
    inner: Arc<MemoryOrderStore>,
    ack_delay: Duration,
}

#[async_trait]
impl OrderStore for SlowAckStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let created = self.inner.create_order(order).await;
        tokio::time::sleep(self.ack_delay).await;
        created
    }

    async fn update_order(&self, order: &Order, expected_status: OrderStatus) -> Result<(), StoreError> {
        let updated = self.inner.update_order(order, expected_status).await;
        tokio::time::sleep(self.ack_delay).await;
        updated
    }

    async fn delete_order(&self, order_id: i64) -> Result<(), StoreError> {
        self.inner.delete_order(order_id).await
    }

    async fn update_status(
        &self,
        order_id: i64,
        user_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<(), StoreError> {
        let updated = self.inner.update_status(order_id, user_id, from, to).await;
        tokio::time::sleep(self.ack_delay).await;
        updated
    }

    async fn get_by_id(&self, order_id: i64) -> Result<Order, StoreError> {
        self.inner.get_by_id(order_id).await
    }
}

/// Reserves like the memory store, then never answers.
struct HangingReserve(Arc<MemoryIdempotencyStore>);

#[async_trait]
impl IdempotencyStore for HangingReserve {
    async fn reserve_with_token(&self, key: &str, token: &str) -> Result<Reservation, IdempotencyError> {
        self.0.reserve_with_token(key, token).await?;
        std::future::pending().await
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool, IdempotencyError> {
        self.0.release(key, token).await
    }
}

async fn wait_for_key(publisher: &InMemoryPublisher, key: &str) -> bool {
    for _ in 0..100 {
        if publisher.keys().await.iter().any(|k| k == key) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_prices_persists_and_publishes() {
    let h = Harness::new().await;

    let outcome = h.create("key-1").await.unwrap();
    let order = &outcome.order;

    assert!(matches!(outcome.publish, PublishStatus::Published));
    assert_eq!(order.user_id, USER);
    assert_eq!(order.quantity, 4);
    assert!((order.total - 110.0).abs() < 1e-9);
    assert!((order.total_mark_up - 11.0).abs() < 1e-9);
    assert!((order.total_discount - 3.0).abs() < 1e-9);
    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(order.line_items.len(), 2);
    assert!(order.totals_consistent());

    // The id lives in the range of the user's shard.
    let router = h.store.router();
    assert_eq!(router.shard_of_order(order.id), Some(router.shard_of(USER)));

    let stored = h.orchestrator.get_order(&ctx(), order.id).await.unwrap();
    assert_eq!(&stored, order);

    let published = h.publisher.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, format!("order-created-{}", order.id));
    let payload: Order = serde_json::from_str(&published[0].1).unwrap();
    assert_eq!(&payload, order);
}

#[tokio::test]
async fn test_insufficient_stock_leaves_no_trace() {
    let h = Harness::new().await;
    h.catalog.set_stock(2, 0).await;

    let err = h.create("key-1").await.unwrap_err();

    assert!(matches!(err, OrderError::Validation { product_id: Some(2), .. }));
    assert_eq!(h.store.row_counts().await, (0, 0));
    assert!(h.publisher.keys().await.is_empty());
    assert!(!h.idempotency.is_reserved("key-1").await);

    // The released key can be retried once stock is back.
    h.catalog.set_stock(2, 10).await;
    assert!(h.create("key-1").await.is_ok());
}

#[tokio::test]
async fn test_invalid_quantity_is_rejected_before_any_call() {
    let h = Harness::new().await;
    let cmd = CreateOrder {
        idempotency_key: "key-1".to_string(),
        line_items: vec![LineItemRequest { product_id: 1, quantity: 0 }],
    };

    let err = h.orchestrator.create_order(&ctx(), cmd).await.unwrap_err();

    assert!(matches!(err, OrderError::Validation { product_id: Some(1), .. }));
    assert_eq!(h.catalog.calls(), 0);
    assert!(!h.idempotency.is_reserved("key-1").await);
}

#[tokio::test]
async fn test_collaborator_failure_releases_key() {
    let h = Harness::new().await;
    h.catalog.fail_product(2).await;

    let err = h.create("key-1").await.unwrap_err();

    assert!(matches!(err, OrderError::Collaborator { product_id: 2, .. }));
    assert_eq!(h.store.row_counts().await, (0, 0));
    assert!(!h.idempotency.is_reserved("key-1").await);
}

#[tokio::test]
async fn test_duplicate_key_creates_one_order() {
    let h = Harness::new().await;

    let first = h.create("key-1").await.unwrap();
    let err = h.create("key-1").await.unwrap_err();

    assert!(matches!(err, OrderError::DuplicateRequest(ref k) if k == "key-1"));
    assert_eq!(h.store.row_counts().await, (1, 2));
    assert_eq!(h.publisher.keys().await, vec![format!("order-created-{}", first.order.id)]);
}

#[tokio::test]
async fn test_concurrent_duplicates_create_one_order() {
    let h = Harness::with_catalog(StaticCatalog::new().with_latency(Duration::from_millis(10)), 8).await;

    let attempts = (0..8).map(|_| h.create("key-1"));
    let results = join_all(attempts).await;

    let created = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(OrderError::DuplicateRequest(_))))
        .count();

    assert_eq!(created, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(h.store.row_counts().await, (1, 2));
    assert_eq!(h.publisher.keys().await.len(), 1);
}

#[tokio::test]
async fn test_line_insert_failure_rolls_back_order() {
    let h = Harness::new().await;
    h.store.faults().fail_line_inserts.store(true, Ordering::SeqCst);

    let err = h.create("key-1").await.unwrap_err();

    assert!(matches!(err, OrderError::Persistence(_)));
    assert_eq!(h.store.row_counts().await, (0, 0));
    assert!(h.publisher.keys().await.is_empty());
    assert!(!h.idempotency.is_reserved("key-1").await);
}

#[tokio::test]
async fn test_checks_respect_concurrency_limit() {
    let h = Harness::with_catalog(StaticCatalog::new().with_latency(Duration::from_millis(20)), 2).await;
    for product_id in 3..8 {
        h.catalog.set_product(product_id, 10, 0.0, 0.0, 1.0).await;
    }

    let cmd = CreateOrder {
        idempotency_key: "key-1".to_string(),
        line_items: (3..8).map(|product_id| LineItemRequest { product_id, quantity: 1 }).collect(),
    };
    let outcome = h.orchestrator.create_order(&ctx(), cmd).await.unwrap();

    assert_eq!(outcome.order.line_items.len(), 5);
    assert_eq!(h.catalog.calls(), 10);
    assert!(h.catalog.peak_in_flight() <= 2);
    assert!(h.catalog.peak_in_flight() >= 1);
}

#[tokio::test]
async fn test_cancelled_request_releases_key() {
    let h = Harness::with_catalog(StaticCatalog::new().with_latency(Duration::from_secs(5)), 8).await;
    let ctx = ctx().with_timeout(Duration::from_millis(30));

    let err = h.orchestrator.create_order(&ctx, standard_order("key-1")).await.unwrap_err();

    assert!(matches!(err, OrderError::Cancelled));
    assert_eq!(h.store.row_counts().await, (0, 0));
    assert!(!h.idempotency.is_reserved("key-1").await);
}

#[tokio::test]
async fn test_commit_acknowledged_after_deadline_keeps_key_and_publishes() {
    let h = Harness::build(
        StaticCatalog::new(),
        DEFAULT_MAX_CONCURRENT_CHECKS,
        |store| {
            Arc::new(SlowAckStore {
                inner: store,
                ack_delay: Duration::from_millis(100),
            }) as Arc<dyn OrderStore>
        },
        |idempotency| idempotency as Arc<dyn IdempotencyStore>,
    )
    .await;
    let ctx = ctx().with_timeout(Duration::from_millis(50));

    let outcome = h.orchestrator.create_order(&ctx, standard_order("key-1")).await.unwrap();

    assert!(matches!(outcome.publish, PublishStatus::Published));
    assert_eq!(h.store.row_counts().await, (1, 2));
    assert!(h.idempotency.is_reserved("key-1").await);
    assert_eq!(h.publisher.keys().await, vec![format!("order-created-{}", outcome.order.id)]);

    let err = h.create("key-1").await.unwrap_err();
    assert!(matches!(err, OrderError::DuplicateRequest(_)));
    assert_eq!(h.store.row_counts().await, (1, 2));
}

#[tokio::test]
async fn test_status_change_acknowledged_after_deadline_publishes() {
    let h = Harness::build(
        StaticCatalog::new(),
        DEFAULT_MAX_CONCURRENT_CHECKS,
        |store| {
            Arc::new(SlowAckStore {
                inner: store,
                ack_delay: Duration::from_millis(100),
            }) as Arc<dyn OrderStore>
        },
        |idempotency| idempotency as Arc<dyn IdempotencyStore>,
    )
    .await;
    let order_id = h.create("key-1").await.unwrap().order.id;
    let ctx = ctx().with_timeout(Duration::from_millis(50));

    let outcome = h.orchestrator.cancel_order(&ctx, CancelOrder { order_id }).await.unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Cancelled);
    assert!(matches!(outcome.publish, PublishStatus::Published));
    assert!(h.publisher.keys().await.contains(&format!("order-cancelled-{order_id}")));
}

#[tokio::test]
async fn test_write_is_not_started_after_cancellation() {
    let h = Harness::new().await;
    let order_id = h.create("key-1").await.unwrap().order.id;
    let ctx = ctx();
    ctx.cancel();

    let err = h.orchestrator.delete_order(&ctx, order_id).await.unwrap_err();

    assert!(matches!(err, OrderError::Cancelled));
    assert_eq!(h.store.row_counts().await, (1, 2));
}

#[tokio::test]
async fn test_hung_reservation_observes_deadline() {
    let h = Harness::build(
        StaticCatalog::new(),
        DEFAULT_MAX_CONCURRENT_CHECKS,
        |store| store as Arc<dyn OrderStore>,
        |idempotency| Arc::new(HangingReserve(idempotency)) as Arc<dyn IdempotencyStore>,
    )
    .await;
    let ctx = ctx().with_timeout(Duration::from_millis(50));

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        h.orchestrator.create_order(&ctx, standard_order("key-1")),
    )
    .await
    .expect("create ignored its deadline");

    assert!(matches!(result, Err(OrderError::Cancelled)));
    assert_eq!(h.catalog.calls(), 0);
    assert_eq!(h.store.row_counts().await, (0, 0));
    // The reservation that landed before the call was abandoned is freed.
    assert!(!h.idempotency.is_reserved("key-1").await);
}

#[tokio::test]
async fn test_empty_idempotency_key_is_a_validation_error() {
    let h = Harness::new().await;

    for key in ["", "   "] {
        let err = h.create(key).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation { product_id: None, .. }));
        assert!(!err.is_transient());
    }
    assert_eq!(h.catalog.calls(), 0);
    assert_eq!(h.store.row_counts().await, (0, 0));
}

#[tokio::test]
async fn test_quantity_overflow_is_rejected_before_any_call() {
    let h = Harness::new().await;
    let cmd = CreateOrder {
        idempotency_key: "key-1".to_string(),
        line_items: vec![
            LineItemRequest { product_id: 1, quantity: i32::MAX },
            LineItemRequest { product_id: 2, quantity: 1 },
        ],
    };

    let err = h.orchestrator.create_order(&ctx(), cmd).await.unwrap_err();

    assert!(matches!(err, OrderError::Validation { .. }));
    assert_eq!(h.catalog.calls(), 0);
    assert!(!h.idempotency.is_reserved("key-1").await);
}

#[tokio::test]
async fn test_publish_failure_is_deferred_and_redelivered() {
    let h = Harness::new().await;
    h.publisher.fail_next(1);

    let outcome = h.create("key-1").await.unwrap();

    assert!(matches!(outcome.publish_error(), Some(OrderError::Publish(_))));
    assert_eq!(h.store.row_counts().await, (1, 2));
    assert!(h.idempotency.is_reserved("key-1").await);

    let key = format!("order-created-{}", outcome.order.id);
    assert!(wait_for_key(&h.publisher, &key).await);
}

// ============================================================================
// Update / Cancel / Delete
// ============================================================================

#[tokio::test]
async fn test_pay_rechecks_stock() {
    let h = Harness::new().await;
    let order_id = h.create("key-1").await.unwrap().order.id;

    h.catalog.set_stock(1, 0).await;
    let err = h
        .orchestrator
        .update_order(&ctx(), set_status(order_id, OrderStatus::Paid))
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::Validation { product_id: Some(1), .. }));
    assert_eq!(h.orchestrator.get_order(&ctx(), order_id).await.unwrap().status, OrderStatus::Created);

    h.catalog.set_stock(1, 100).await;
    let outcome = h
        .orchestrator
        .update_order(&ctx(), set_status(order_id, OrderStatus::Paid))
        .await
        .unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Paid);
    assert!(matches!(outcome.publish, PublishStatus::Published));
    assert!(h.publisher.keys().await.contains(&format!("order-updated-{order_id}")));
}

#[tokio::test]
async fn test_update_replaces_lines_while_created() {
    let h = Harness::new().await;
    let order_id = h.create("key-1").await.unwrap().order.id;

    let lines = vec![LineItem {
        product_id: 1,
        quantity: 2,
        mark_up: 4.0,
        discount: 2.0,
        final_price: 40.0,
    }];
    let outcome = h
        .orchestrator
        .update_order(
            &ctx(),
            UpdateOrder {
                order_id,
                status: OrderStatus::Created,
                line_items: Some(lines),
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.order.quantity, 2);
    assert!((outcome.order.total - 40.0).abs() < 1e-9);
    assert_eq!(h.store.row_counts().await, (1, 1));

    let stored = h.orchestrator.get_order(&ctx(), order_id).await.unwrap();
    assert!(stored.totals_consistent());
}

#[tokio::test]
async fn test_update_rejects_invalid_replacement_lines() {
    let h = Harness::new().await;
    let created = h.create("key-1").await.unwrap().order;

    let line = |quantity: i32, final_price: f64| LineItem {
        product_id: 1,
        quantity,
        mark_up: 0.0,
        discount: 0.0,
        final_price,
    };
    let replacements = [
        vec![line(1, f64::NAN)],
        vec![line(1, -5.0)],
        vec![line(1, f64::INFINITY)],
        vec![line(i32::MAX, 1.0), line(1, 1.0)],
    ];

    for lines in replacements {
        let cmd = UpdateOrder {
            order_id: created.id,
            status: OrderStatus::Created,
            line_items: Some(lines),
        };
        let err = h.orchestrator.update_order(&ctx(), cmd).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation { .. }));
    }

    let stored = h.orchestrator.get_order(&ctx(), created.id).await.unwrap();
    assert_eq!(stored, created);
    assert_eq!(h.publisher.keys().await.len(), 1);
}

#[tokio::test]
async fn test_lines_are_frozen_after_payment() {
    let h = Harness::new().await;
    let order = h.create("key-1").await.unwrap().order;
    h.orchestrator
        .update_order(&ctx(), set_status(order.id, OrderStatus::Paid))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .update_order(
            &ctx(),
            UpdateOrder {
                order_id: order.id,
                status: OrderStatus::Paid,
                line_items: Some(order.line_items[..1].to_vec()),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::Validation { .. }));
    assert_eq!(h.store.row_counts().await, (1, 2));
}

#[tokio::test]
async fn test_same_status_update_is_noop() {
    let h = Harness::new().await;
    let order_id = h.create("key-1").await.unwrap().order.id;

    let outcome = h
        .orchestrator
        .update_order(&ctx(), set_status(order_id, OrderStatus::Created))
        .await
        .unwrap();

    assert!(matches!(outcome.publish, PublishStatus::NotRequired));
    assert_eq!(h.publisher.keys().await.len(), 1);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let h = Harness::new().await;
    let order_id = h.create("key-1").await.unwrap().order.id;

    let first = h.orchestrator.cancel_order(&ctx(), CancelOrder { order_id }).await.unwrap();
    let second = h.orchestrator.cancel_order(&ctx(), CancelOrder { order_id }).await.unwrap();

    assert_eq!(first.order.status, OrderStatus::Cancelled);
    assert!(matches!(first.publish, PublishStatus::Published));
    assert_eq!(second.order.status, OrderStatus::Cancelled);
    assert!(matches!(second.publish, PublishStatus::NotRequired));
    assert_eq!(
        h.publisher.keys().await,
        vec![format!("order-created-{order_id}"), format!("order-cancelled-{order_id}")]
    );

    let stored = h.orchestrator.get_order(&ctx(), order_id).await.unwrap();
    assert_eq!(stored, first.order);
    assert_eq!(stored.line_items, first.order.line_items);
    assert_eq!(stored.quantity, 4);
    assert!((stored.total - 110.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_cancelled_order_cannot_be_paid() {
    let h = Harness::new().await;
    let order_id = h.create("key-1").await.unwrap().order.id;
    h.orchestrator.cancel_order(&ctx(), CancelOrder { order_id }).await.unwrap();

    let err = h
        .orchestrator
        .update_order(&ctx(), set_status(order_id, OrderStatus::Paid))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::Validation { .. }));
}

#[tokio::test]
async fn test_delete_removes_order_without_event() {
    let h = Harness::new().await;
    let order_id = h.create("key-1").await.unwrap().order.id;

    h.orchestrator.delete_order(&ctx(), order_id).await.unwrap();

    assert_eq!(h.store.row_counts().await, (0, 0));
    assert!(matches!(
        h.orchestrator.get_order(&ctx(), order_id).await,
        Err(OrderError::NotFound(id)) if id == order_id
    ));
    assert!(matches!(
        h.orchestrator.delete_order(&ctx(), order_id).await,
        Err(OrderError::NotFound(_))
    ));
    assert_eq!(h.publisher.keys().await.len(), 1);
}

#[tokio::test]
async fn test_unknown_order() {
    let h = Harness::new().await;

    assert!(matches!(
        h.orchestrator.cancel_order(&ctx(), CancelOrder { order_id: 1_000_001 }).await,
        Err(OrderError::NotFound(_))
    ));
}
