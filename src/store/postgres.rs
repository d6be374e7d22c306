use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};

use super::{schema, DeadLetterSink, OrderStore, StoreError};
use crate::domain::order::{LineItem, NewOrder, Order, OrderStatus};
use crate::messaging::DeadLetter;
use crate::sharding::ShardRouter;

// ============================================================================
// Postgres Sharded Order Store
// ============================================================================
//
// One connection pool per shard. A transaction is only ever opened on a
// single pool, and dropping an uncommitted sqlx transaction rolls it back,
// so a cancelled request never leaves a partial order behind.
//
// ============================================================================

/// Postgres `sequence_generator_limit_exceeded`.
const SEQUENCE_EXHAUSTED: &str = "2200H";

pub struct ShardedOrderStore {
    shards: Vec<PgPool>,
    router: ShardRouter,
}

impl ShardedOrderStore {
    pub fn new(shards: Vec<PgPool>) -> Result<Self, StoreError> {
        if shards.is_empty() {
            return Err(StoreError::Backend("at least one shard is required".to_string()));
        }
        let router = ShardRouter::new(shards.len());
        Ok(Self { shards, router })
    }

    /// Connect one pool per URL; the position of a URL is its shard index.
    pub async fn connect(urls: &[String], max_connections: u32) -> Result<Self, StoreError> {
        let mut shards = Vec::with_capacity(urls.len());

        for (shard, url) in urls.iter().enumerate() {
            let pool = PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(url)
                .await?;
            tracing::info!(shard, "Connected to order shard");
            shards.push(pool);
        }

        Self::new(shards)
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for (shard, pool) in self.shards.iter().enumerate() {
            schema::ensure_schema(pool, &self.router, shard).await?;
        }
        Ok(())
    }

    /// Shards that failed a trivial round trip, with the error.
    pub async fn unreachable_shards(&self) -> Vec<(usize, StoreError)> {
        let mut failures = Vec::new();
        for (shard, pool) in self.shards.iter().enumerate() {
            if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
                failures.push((shard, StoreError::Database(e)));
            }
        }
        failures
    }

    fn pool(&self, shard: usize) -> Result<&PgPool, StoreError> {
        self.shards
            .get(shard)
            .ok_or_else(|| StoreError::Backend(format!("no pool for shard {shard}")))
    }

    /// Shard of an existing order; the id range and the owning user must agree.
    fn shard_of_existing(&self, order_id: i64, user_id: i64) -> Result<usize, StoreError> {
        let shard = self
            .router
            .shard_of_order(order_id)
            .ok_or(StoreError::NotFound(order_id))?;

        if shard != self.router.shard_of(user_id) {
            return Err(StoreError::ShardMismatch { order_id, user_id });
        }
        Ok(shard)
    }

    /// After a guarded write matched nothing, tell a missing order apart from
    /// one whose status moved underneath us.
    async fn missing_or_conflict(conn: &mut PgConnection, order_id: i64) -> StoreError {
        match sqlx::query("SELECT 1 FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&mut *conn)
            .await
        {
            Ok(Some(_)) => StoreError::Conflict(order_id),
            Ok(None) => StoreError::NotFound(order_id),
            Err(e) => StoreError::Database(e),
        }
    }
}

async fn insert_lines(conn: &mut PgConnection, order_id: i64, lines: &[LineItem]) -> Result<(), StoreError> {
    if lines.is_empty() {
        return Ok(());
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO product_requests (order_id, product_id, quantity, mark_up, discount, final_price) ",
    );
    builder.push_values(lines, |mut row, line| {
        row.push_bind(order_id)
            .push_bind(line.product_id)
            .push_bind(line.quantity)
            .push_bind(line.mark_up)
            .push_bind(line.discount)
            .push_bind(line.final_price);
    });

    builder.build().execute(&mut *conn).await?;
    Ok(())
}

fn map_insert_error(err: sqlx::Error, idempotency_key: &str, shard: usize) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::DuplicateKey(idempotency_key.to_string());
        }
        if db.code().as_deref() == Some(SEQUENCE_EXHAUSTED) {
            return StoreError::IdSpaceExhausted(shard);
        }
    }
    StoreError::Database(err)
}

fn order_from_row(row: &PgRow, line_items: Vec<LineItem>) -> Result<Order, StoreError> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<OrderStatus>()
        .map_err(|reason| StoreError::Corrupt { order_id: id, reason })?;

    Ok(Order {
        id,
        user_id: row.try_get("user_id")?,
        line_items,
        quantity: row.try_get("quantity")?,
        total: row.try_get("total")?,
        total_mark_up: row.try_get("total_mark_up")?,
        total_discount: row.try_get("total_discount")?,
        status,
        idempotency_key: row.try_get("idempotency_key")?,
    })
}

fn line_from_row(row: &PgRow) -> Result<LineItem, StoreError> {
    Ok(LineItem {
        product_id: row.try_get("product_id")?,
        quantity: row.try_get("quantity")?,
        mark_up: row.try_get("mark_up")?,
        discount: row.try_get("discount")?,
        final_price: row.try_get("final_price")?,
    })
}

#[async_trait]
impl DeadLetterSink for ShardedOrderStore {
    /// Store an event that could not be published on the shard owning its
    /// order, next to the order itself.
    async fn record_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        let shard = self
            .router
            .shard_of_order(letter.order_id)
            .ok_or(StoreError::NotFound(letter.order_id))?;

        sqlx::query(
            "INSERT INTO dead_letter_events (
                id, order_id, event_key, event_type, payload,
                error_message, attempts, first_failed_at, last_failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                error_message = EXCLUDED.error_message,
                attempts = EXCLUDED.attempts,
                last_failed_at = EXCLUDED.last_failed_at",
        )
        .bind(letter.id)
        .bind(letter.order_id)
        .bind(&letter.event_key)
        .bind(letter.event_type.as_str())
        .bind(&letter.payload)
        .bind(&letter.error_message)
        .bind(letter.attempts)
        .bind(letter.first_failed_at)
        .bind(letter.last_failed_at)
        .execute(self.pool(shard)?)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderStore for ShardedOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let shard = self.router.shard_of(order.user_id);
        let mut tx = self.pool(shard)?.begin().await?;

        let row = sqlx::query(
            "INSERT INTO orders (
                user_id, quantity, total, total_mark_up, total_discount, status, idempotency_key
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id",
        )
        .bind(order.user_id)
        .bind(order.quantity)
        .bind(order.total)
        .bind(order.total_mark_up)
        .bind(order.total_discount)
        .bind(order.status.as_str())
        .bind(&order.idempotency_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_insert_error(e, &order.idempotency_key, shard))?;

        let order_id: i64 = row.try_get("id")?;

        // An error here drops `tx`, which rolls back the order row as well.
        insert_lines(&mut tx, order_id, &order.line_items).await?;
        tx.commit().await?;

        tracing::info!(
            order_id,
            user_id = order.user_id,
            shard,
            line_count = order.line_items.len(),
            "Committed order and line items"
        );

        Ok(order.into_order(order_id))
    }

    async fn update_order(&self, order: &Order, expected_status: OrderStatus) -> Result<(), StoreError> {
        let shard = self.shard_of_existing(order.id, order.user_id)?;
        let mut tx = self.pool(shard)?.begin().await?;

        let updated = sqlx::query(
            "UPDATE orders
             SET quantity = $1, total = $2, total_mark_up = $3, total_discount = $4, status = $5
             WHERE id = $6 AND status = $7",
        )
        .bind(order.quantity)
        .bind(order.total)
        .bind(order.total_mark_up)
        .bind(order.total_discount)
        .bind(order.status.as_str())
        .bind(order.id)
        .bind(expected_status.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Self::missing_or_conflict(&mut tx, order.id).await);
        }

        sqlx::query("DELETE FROM product_requests WHERE order_id = $1")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;
        insert_lines(&mut tx, order.id, &order.line_items).await?;
        tx.commit().await?;

        tracing::info!(order_id = order.id, shard, status = %order.status, "Updated order");
        Ok(())
    }

    async fn delete_order(&self, order_id: i64) -> Result<(), StoreError> {
        let shard = self
            .router
            .shard_of_order(order_id)
            .ok_or(StoreError::NotFound(order_id))?;
        let mut tx = self.pool(shard)?.begin().await?;

        sqlx::query("DELETE FROM product_requests WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound(order_id));
        }

        tx.commit().await?;
        tracing::info!(order_id, shard, "Deleted order");
        Ok(())
    }

    async fn update_status(
        &self,
        order_id: i64,
        user_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<(), StoreError> {
        let shard = self.shard_of_existing(order_id, user_id)?;
        let mut conn = self.pool(shard)?.acquire().await?;

        let updated = sqlx::query("UPDATE orders SET status = $1 WHERE id = $2 AND status = $3")
            .bind(to.as_str())
            .bind(order_id)
            .bind(from.as_str())
            .execute(&mut *conn)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(Self::missing_or_conflict(&mut conn, order_id).await);
        }

        tracing::info!(order_id, shard, %from, %to, "Updated order status");
        Ok(())
    }

    async fn get_by_id(&self, order_id: i64) -> Result<Order, StoreError> {
        let shard = self
            .router
            .shard_of_order(order_id)
            .ok_or(StoreError::NotFound(order_id))?;

        // Both reads share one transaction so the lines match the order row.
        let mut tx = self.pool(shard)?.begin().await?;

        let order_row = sqlx::query(
            "SELECT id, user_id, quantity, total, total_mark_up, total_discount, status, idempotency_key
             FROM orders WHERE id = $1",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(order_id))?;

        let line_rows = sqlx::query(
            "SELECT product_id, quantity, mark_up, discount, final_price
             FROM product_requests WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let lines = line_rows.iter().map(line_from_row).collect::<Result<Vec<_>, _>>()?;
        order_from_row(&order_row, lines)
    }
}
