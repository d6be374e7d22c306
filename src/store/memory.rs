use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{OrderStore, StoreError};
use crate::domain::order::{LineItem, NewOrder, Order, OrderStatus};
use crate::sharding::ShardRouter;

// ============================================================================
// In-memory Sharded Order Store
// ============================================================================
//
// Mirrors the Postgres layout: each shard has its own id sequence bounded to
// the shard's range, an orders table, and a line item table. A write works
// on a staged copy of the shard and swaps it in only once every step has
// succeeded, which gives the same all-or-nothing contract as a transaction.
//
// ============================================================================

#[derive(Debug, Clone)]
struct OrderRow {
    user_id: i64,
    quantity: i32,
    total: f64,
    total_mark_up: f64,
    total_discount: f64,
    status: OrderStatus,
    idempotency_key: String,
}

#[derive(Debug, Clone)]
struct ShardState {
    next_id: i64,
    max_id: i64,
    orders: BTreeMap<i64, OrderRow>,
    lines: BTreeMap<i64, Vec<LineItem>>,
    keys: HashMap<String, i64>,
}

impl ShardState {
    fn new(router: &ShardRouter, shard: usize) -> Self {
        Self {
            next_id: router.id_base(shard),
            max_id: router.id_max(shard),
            orders: BTreeMap::new(),
            lines: BTreeMap::new(),
            keys: HashMap::new(),
        }
    }

    fn line_count(&self) -> usize {
        self.lines.values().map(Vec::len).sum()
    }
}

/// Switches that make the next writes fail, for exercising rollback paths.
#[derive(Debug, Default)]
pub struct StoreFaults {
    pub fail_order_inserts: AtomicBool,
    pub fail_line_inserts: AtomicBool,
}

impl StoreFaults {
    fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Backend(format!("injected failure inserting {what}")))
        } else {
            Ok(())
        }
    }
}

pub struct MemoryOrderStore {
    router: ShardRouter,
    shards: Vec<Mutex<ShardState>>,
    faults: Arc<StoreFaults>,
}

impl MemoryOrderStore {
    pub fn new(shard_count: usize) -> Self {
        let router = ShardRouter::new(shard_count);
        let shards = (0..shard_count)
            .map(|shard| Mutex::new(ShardState::new(&router, shard)))
            .collect();

        Self {
            router,
            shards,
            faults: Arc::new(StoreFaults::default()),
        }
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn faults(&self) -> Arc<StoreFaults> {
        Arc::clone(&self.faults)
    }

    /// Total (orders, line items) across all shards.
    pub async fn row_counts(&self) -> (usize, usize) {
        let mut orders = 0;
        let mut lines = 0;
        for shard in &self.shards {
            let state = shard.lock().await;
            orders += state.orders.len();
            lines += state.line_count();
        }
        (orders, lines)
    }

    fn shard(&self, shard: usize) -> Result<&Mutex<ShardState>, StoreError> {
        self.shards
            .get(shard)
            .ok_or_else(|| StoreError::Backend(format!("no such shard {shard}")))
    }

    fn owning_shard(&self, order_id: i64) -> Result<usize, StoreError> {
        self.router
            .shard_of_order(order_id)
            .ok_or(StoreError::NotFound(order_id))
    }

    fn guard_status(state: &ShardState, order_id: i64, expected: OrderStatus) -> Result<(), StoreError> {
        match state.orders.get(&order_id) {
            None => Err(StoreError::NotFound(order_id)),
            Some(row) if row.status != expected => Err(StoreError::Conflict(order_id)),
            Some(_) => Ok(()),
        }
    }

    fn insert_lines(&self, state: &mut ShardState, order_id: i64, lines: &[LineItem]) -> Result<(), StoreError> {
        StoreFaults::check(&self.faults.fail_line_inserts, "line items")?;
        state.lines.insert(order_id, lines.to_vec());
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let shard = self.router.shard_of(order.user_id);
        let mut state = self.shard(shard)?.lock().await;
        let mut staged = state.clone();

        StoreFaults::check(&self.faults.fail_order_inserts, "order")?;

        if staged.keys.contains_key(&order.idempotency_key) {
            return Err(StoreError::DuplicateKey(order.idempotency_key));
        }
        if staged.next_id > staged.max_id {
            return Err(StoreError::IdSpaceExhausted(shard));
        }

        let order_id = staged.next_id;
        staged.next_id += 1;
        staged.keys.insert(order.idempotency_key.clone(), order_id);
        staged.orders.insert(
            order_id,
            OrderRow {
                user_id: order.user_id,
                quantity: order.quantity,
                total: order.total,
                total_mark_up: order.total_mark_up,
                total_discount: order.total_discount,
                status: order.status,
                idempotency_key: order.idempotency_key.clone(),
            },
        );
        self.insert_lines(&mut staged, order_id, &order.line_items)?;

        *state = staged;
        tracing::debug!(order_id, shard, "Committed order in memory");

        Ok(order.into_order(order_id))
    }

    async fn update_order(&self, order: &Order, expected_status: OrderStatus) -> Result<(), StoreError> {
        let shard = self.owning_shard(order.id)?;
        if shard != self.router.shard_of(order.user_id) {
            return Err(StoreError::ShardMismatch {
                order_id: order.id,
                user_id: order.user_id,
            });
        }

        let mut state = self.shard(shard)?.lock().await;
        Self::guard_status(&state, order.id, expected_status)?;

        let mut staged = state.clone();
        if let Some(row) = staged.orders.get_mut(&order.id) {
            row.quantity = order.quantity;
            row.total = order.total;
            row.total_mark_up = order.total_mark_up;
            row.total_discount = order.total_discount;
            row.status = order.status;
        }
        staged.lines.remove(&order.id);
        self.insert_lines(&mut staged, order.id, &order.line_items)?;

        *state = staged;
        Ok(())
    }

    async fn delete_order(&self, order_id: i64) -> Result<(), StoreError> {
        let shard = self.owning_shard(order_id)?;
        let mut state = self.shard(shard)?.lock().await;

        let row = state.orders.remove(&order_id).ok_or(StoreError::NotFound(order_id))?;
        state.lines.remove(&order_id);
        state.keys.remove(&row.idempotency_key);
        Ok(())
    }

    async fn update_status(
        &self,
        order_id: i64,
        user_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<(), StoreError> {
        let shard = self.owning_shard(order_id)?;
        if shard != self.router.shard_of(user_id) {
            return Err(StoreError::ShardMismatch { order_id, user_id });
        }

        let mut state = self.shard(shard)?.lock().await;
        Self::guard_status(&state, order_id, from)?;

        if let Some(row) = state.orders.get_mut(&order_id) {
            row.status = to;
        }
        Ok(())
    }

    async fn get_by_id(&self, order_id: i64) -> Result<Order, StoreError> {
        let shard = self.owning_shard(order_id)?;
        let state = self.shard(shard)?.lock().await;

        let row = state.orders.get(&order_id).ok_or(StoreError::NotFound(order_id))?;
        let line_items = state.lines.get(&order_id).cloned().unwrap_or_default();

        Ok(Order {
            id: order_id,
            user_id: row.user_id,
            line_items,
            quantity: row.quantity,
            total: row.total,
            total_mark_up: row.total_mark_up,
            total_discount: row.total_discount,
            status: row.status,
            idempotency_key: row.idempotency_key.clone(),
        })
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
