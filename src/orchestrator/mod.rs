// ============================================================================
// Order Orchestrator
// ============================================================================
//
// Create:  ReservingKey -> Validating -> Persisting -> Publishing -> Done
//          (Failed is reachable from every state before Done)
//
// - Stock and pricing checks for every line run concurrently, bounded by
//   `max_concurrent_checks` outbound calls at a time.
// - The order and its lines commit in one transaction on the owning shard.
// - A publish failure never undoes a commit: the outcome reports it and the
//   event goes to the outbox relay for redelivery.
// - Any failure before the commit releases the idempotency reservation so a
//   legitimate retry is not blocked.
// - Cancellation is observed up to the point a write is issued. A write that
//   has started runs to completion, so a committed change always gets its
//   event and keeps its idempotency key.
//
// ============================================================================

mod fanout;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use kameo::actor::ActorRef;

use crate::actors::{OutboxRelay, Redeliver};
use crate::clients::{ClientError, PricingClient, StockClient};
use crate::context::{Cancelled, RequestContext};
use crate::domain::order::{
    validate_idempotency_key, validate_lines, validate_requests, CancelOrder, Collaborator, CreateOrder,
    LifecycleEvent, LineItem, LineItemRequest, NewOrder, Order, OrderError, OrderEventType, OrderStatus,
    PriceQuote, UpdateOrder,
};
use crate::idempotency::{new_token, IdempotencyStore, Reservation};
use crate::messaging::EventPublisher;
use crate::metrics::Metrics;
use crate::store::{OrderStore, StoreError};

pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 8;

/// Upper bound on releasing a reservation, which also runs after the
/// request itself was cancelled.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreateState {
    ReservingKey,
    Validating,
    Persisting,
    Publishing,
    Done,
    Failed,
}

impl CreateState {
    fn as_str(&self) -> &'static str {
        match self {
            CreateState::ReservingKey => "reserving_key",
            CreateState::Validating => "validating",
            CreateState::Persisting => "persisting",
            CreateState::Publishing => "publishing",
            CreateState::Done => "done",
            CreateState::Failed => "failed",
        }
    }
}

/// What happened to the lifecycle event of a successful operation.
#[derive(Debug)]
pub enum PublishStatus {
    Published,
    /// The broker rejected the event; the relay keeps retrying it.
    Deferred(OrderError),
    /// Nothing changed, so nothing was published.
    NotRequired,
}

#[derive(Debug)]
pub struct OrderOutcome {
    pub order: Order,
    pub publish: PublishStatus,
}

impl OrderOutcome {
    pub fn publish_error(&self) -> Option<&OrderError> {
        match &self.publish {
            PublishStatus::Deferred(err) => Some(err),
            _ => None,
        }
    }

    fn unchanged(order: Order) -> Self {
        Self {
            order,
            publish: PublishStatus::NotRequired,
        }
    }
}

/// One outbound call made while validating a line.
#[derive(Debug, Clone, Copy)]
enum LineCheck {
    Stock(LineItemRequest),
    Price(LineItemRequest),
}

#[derive(Debug)]
enum CheckResult {
    InStock,
    Quote(PriceQuote),
}

pub struct OrderOrchestrator {
    store: Arc<dyn OrderStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    stock: Arc<dyn StockClient>,
    pricing: Arc<dyn PricingClient>,
    publisher: Arc<dyn EventPublisher>,
    relay: Option<ActorRef<OutboxRelay>>,
    metrics: Option<Arc<Metrics>>,
    max_concurrent_checks: usize,
}

impl OrderOrchestrator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        stock: Arc<dyn StockClient>,
        pricing: Arc<dyn PricingClient>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            idempotency,
            stock,
            pricing,
            publisher,
            relay: None,
            metrics: None,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
        }
    }

    pub fn with_max_concurrent_checks(mut self, limit: usize) -> Self {
        self.max_concurrent_checks = limit.max(1);
        self
    }

    pub fn with_relay(mut self, relay: ActorRef<OutboxRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub async fn create_order(&self, ctx: &RequestContext, cmd: CreateOrder) -> Result<OrderOutcome, OrderError> {
        let started = Instant::now();
        let result = self.create(ctx, cmd).await;
        self.record("create", &result, started);
        result
    }

    pub async fn update_order(&self, ctx: &RequestContext, cmd: UpdateOrder) -> Result<OrderOutcome, OrderError> {
        let started = Instant::now();
        let result = self.update(ctx, cmd).await;
        self.record("update", &result, started);
        result
    }

    pub async fn cancel_order(&self, ctx: &RequestContext, cmd: CancelOrder) -> Result<OrderOutcome, OrderError> {
        let started = Instant::now();
        let result = self.cancel(ctx, cmd.order_id).await;
        self.record("cancel", &result, started);
        result
    }

    pub async fn get_order(&self, ctx: &RequestContext, order_id: i64) -> Result<Order, OrderError> {
        Ok(ctx.run(self.store.get_by_id(order_id)).await??)
    }

    /// Remove an order and its lines. No lifecycle event is emitted.
    pub async fn delete_order(&self, ctx: &RequestContext, order_id: i64) -> Result<(), OrderError> {
        let started = Instant::now();
        let result = match ensure_live(ctx) {
            Ok(()) => self.store.delete_order(order_id).await.map_err(OrderError::from),
            Err(err) => Err(err),
        };

        if result.is_ok() {
            tracing::info!(order_id, "Order deleted");
        }
        self.record("delete", &result, started);
        result
    }

    // ========================================================================
    // Create
    // ========================================================================

    async fn create(&self, ctx: &RequestContext, cmd: CreateOrder) -> Result<OrderOutcome, OrderError> {
        let user_id = ctx.user_id();
        let key = cmd.idempotency_key;

        validate_idempotency_key(&key)?;
        validate_requests(&cmd.line_items)?;

        self.enter(CreateState::ReservingKey, user_id, &key);
        let token = new_token();
        let reservation = match ctx.run(self.idempotency.reserve_with_token(&key, &token)).await {
            Ok(reservation) => reservation?,
            Err(Cancelled) => {
                // The reservation may have landed before the call was dropped.
                self.release(&key, &token).await;
                return Err(OrderError::Cancelled);
            }
        };

        match reservation {
            Reservation::Reserved(_) => {}
            Reservation::AlreadyExists => {
                tracing::info!(user_id, idempotency_key = %key, "Duplicate create request rejected");
                return Err(OrderError::DuplicateRequest(key));
            }
        };

        let order = match self.validate_and_persist(ctx, user_id, &key, &cmd.line_items).await {
            Ok(order) => order,
            Err(err) => {
                self.enter(CreateState::Failed, user_id, &key);
                tracing::warn!(user_id, idempotency_key = %key, error = %err, kind = err.kind(), "Create failed");

                // A unique violation means an order already holds this key.
                if !matches!(err, OrderError::DuplicateRequest(_)) {
                    self.release(&key, &token).await;
                }
                return Err(err);
            }
        };

        self.enter(CreateState::Publishing, user_id, &key);
        let publish = self.publish(OrderEventType::Created, &order).await;

        self.enter(CreateState::Done, user_id, &key);
        tracing::info!(
            order_id = order.id,
            user_id,
            quantity = order.quantity,
            total = order.total,
            "Order created"
        );

        Ok(OrderOutcome { order, publish })
    }

    async fn validate_and_persist(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        key: &str,
        items: &[LineItemRequest],
    ) -> Result<Order, OrderError> {
        self.enter(CreateState::Validating, user_id, key);
        let lines = self.price_lines(ctx, items).await?;

        self.enter(CreateState::Persisting, user_id, key);
        ensure_live(ctx)?;
        let new_order = NewOrder::new(user_id, key, lines);
        Ok(self.store.create_order(new_order).await?)
    }

    /// Check stock and fetch a quote for every line, two calls per line.
    async fn price_lines(&self, ctx: &RequestContext, items: &[LineItemRequest]) -> Result<Vec<LineItem>, OrderError> {
        let jobs = items
            .iter()
            .flat_map(|item| [LineCheck::Stock(*item), LineCheck::Price(*item)])
            .collect();

        let results = self.run_checks(ctx, jobs).await?;

        items
            .iter()
            .zip(results.chunks(2))
            .map(|(item, pair)| match pair {
                [CheckResult::InStock, CheckResult::Quote(quote)] => Ok(LineItem::priced(*item, quote)),
                _ => Err(OrderError::validation(Some(item.product_id), "incomplete line check")),
            })
            .collect()
    }

    async fn run_checks(&self, ctx: &RequestContext, jobs: Vec<LineCheck>) -> Result<Vec<CheckResult>, OrderError> {
        let stock = Arc::clone(&self.stock);
        let pricing = Arc::clone(&self.pricing);

        let result = fanout::run_bounded(ctx, self.max_concurrent_checks, jobs, move |task_ctx, job| {
            let stock = Arc::clone(&stock);
            let pricing = Arc::clone(&pricing);
            async move {
                match job {
                    LineCheck::Stock(item) => {
                        let available = stock
                            .check_availability(&task_ctx, item.product_id, item.quantity)
                            .await
                            .map_err(|e| collaborator_error(Collaborator::Stock, item.product_id, e))?;

                        if !available {
                            return Err(OrderError::validation(
                                Some(item.product_id),
                                format!("insufficient stock for {} units", item.quantity),
                            ));
                        }
                        Ok(CheckResult::InStock)
                    }
                    LineCheck::Price(item) => {
                        let quote = pricing
                            .quote(&task_ctx, item.product_id)
                            .await
                            .map_err(|e| collaborator_error(Collaborator::Pricing, item.product_id, e))?;
                        Ok(CheckResult::Quote(quote))
                    }
                }
            }
        })
        .await;

        if let (Err(err), Some(metrics)) = (&result, &self.metrics) {
            metrics.record_validation_failure(err.kind());
        }
        result
    }

    // ========================================================================
    // Update / Cancel
    // ========================================================================

    async fn update(&self, ctx: &RequestContext, cmd: UpdateOrder) -> Result<OrderOutcome, OrderError> {
        let current = ctx.run(self.store.get_by_id(cmd.order_id)).await??;
        current.ensure_transition(cmd.status)?;

        if current.status == cmd.status && cmd.line_items.is_none() {
            tracing::debug!(order_id = current.id, status = %current.status, "Update is a no-op");
            return Ok(OrderOutcome::unchanged(current));
        }

        let mut updated = current.clone();

        if let Some(lines) = cmd.line_items {
            if current.status != OrderStatus::Created {
                return Err(OrderError::validation(
                    None,
                    format!("line items of a {} order cannot change", current.status),
                ));
            }
            validate_lines(&lines)?;
            updated.replace_lines(lines);
        }

        updated.status = cmd.status;

        if cmd.status == OrderStatus::Paid && current.status != OrderStatus::Paid {
            let jobs = updated
                .line_items
                .iter()
                .map(|line| {
                    LineCheck::Stock(LineItemRequest {
                        product_id: line.product_id,
                        quantity: line.quantity,
                    })
                })
                .collect();
            self.run_checks(ctx, jobs).await?;
        }

        ensure_live(ctx)?;
        self.store.update_order(&updated, current.status).await?;
        tracing::info!(
            order_id = updated.id,
            from = %current.status,
            to = %updated.status,
            "Order updated"
        );

        let publish = self.publish(OrderEventType::Updated, &updated).await;
        Ok(OrderOutcome { order: updated, publish })
    }

    async fn cancel(&self, ctx: &RequestContext, order_id: i64) -> Result<OrderOutcome, OrderError> {
        let mut order = ctx.run(self.store.get_by_id(order_id)).await??;

        if order.status.is_terminal() {
            tracing::debug!(order_id, "Order already cancelled");
            return Ok(OrderOutcome::unchanged(order));
        }
        order.ensure_transition(OrderStatus::Cancelled)?;

        ensure_live(ctx)?;
        let guarded = self
            .store
            .update_status(order_id, order.user_id, order.status, OrderStatus::Cancelled);

        match guarded.await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                // Lost a race; fine if the winner also cancelled.
                let latest = ctx.run(self.store.get_by_id(order_id)).await??;
                if latest.status == OrderStatus::Cancelled {
                    return Ok(OrderOutcome::unchanged(latest));
                }
                return Err(OrderError::Persistence(StoreError::Conflict(order_id)));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(order_id, from = %order.status, "Order cancelled");
        order.status = OrderStatus::Cancelled;

        let publish = self.publish(OrderEventType::Cancelled, &order).await;
        Ok(OrderOutcome { order, publish })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn publish(&self, event_type: OrderEventType, order: &Order) -> PublishStatus {
        let event = LifecycleEvent::new(event_type, order.clone());

        match self.publisher.publish(&event).await {
            Ok(()) => PublishStatus::Published,
            Err(error) => {
                tracing::warn!(
                    order_id = order.id,
                    event_key = %event.key(),
                    error = %error,
                    "Publish failed after commit, deferring to outbox relay"
                );

                if let Some(relay) = &self.relay {
                    let handoff = Redeliver {
                        event,
                        first_error: error.to_string(),
                        first_failed_at: Utc::now(),
                    };
                    if let Err(e) = relay.tell(handoff).send().await {
                        tracing::error!(order_id = order.id, error = %e, "Outbox relay unavailable");
                    }
                }

                PublishStatus::Deferred(OrderError::Publish(error))
            }
        }
    }

    async fn release(&self, key: &str, token: &str) {
        match tokio::time::timeout(RELEASE_TIMEOUT, self.idempotency.release(key, token)).await {
            Ok(Ok(released)) => tracing::debug!(idempotency_key = %key, released, "Released idempotency key"),
            Ok(Err(e)) => tracing::error!(idempotency_key = %key, error = %e, "Failed to release idempotency key"),
            Err(_) => tracing::error!(idempotency_key = %key, "Timed out releasing idempotency key"),
        }
    }

    fn enter(&self, state: CreateState, user_id: i64, key: &str) {
        tracing::debug!(user_id, idempotency_key = %key, state = state.as_str(), "Create state transition");
    }

    fn record<T>(&self, operation: &str, result: &Result<T, OrderError>, started: Instant) {
        if let Some(metrics) = &self.metrics {
            let outcome = match result {
                Ok(_) => "ok",
                Err(err) => err.kind(),
            };
            metrics.record_order(operation, outcome, started.elapsed().as_secs_f64());
        }
    }
}

/// Refuse to start a write once the request is cancelled.
fn ensure_live(ctx: &RequestContext) -> Result<(), OrderError> {
    if ctx.is_cancelled() {
        return Err(OrderError::Cancelled);
    }
    Ok(())
}

fn collaborator_error(service: Collaborator, product_id: i64, source: ClientError) -> OrderError {
    match source {
        ClientError::Cancelled => OrderError::Cancelled,
        source => OrderError::Collaborator {
            service,
            product_id,
            source,
        },
    }
}

#[cfg(test)]
mod tests;
