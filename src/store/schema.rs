use sqlx::PgPool;

use super::StoreError;
use crate::sharding::ShardRouter;

// ============================================================================
// Per-shard schema bootstrap
// ============================================================================
//
// Every statement is idempotent so the bootstrap can run on each start.
// The order sequence is bounded to the shard's identifier range, which is
// what lets an order id be routed back to its shard.
//
// ============================================================================

pub fn statements(router: &ShardRouter, shard: usize) -> Vec<String> {
    let base = router.id_base(shard);
    let max = router.id_max(shard);

    vec![
        format!(
            "CREATE SEQUENCE IF NOT EXISTS orders_id_seq AS BIGINT \
             START WITH {base} MINVALUE {base} MAXVALUE {max} NO CYCLE"
        ),
        "CREATE TABLE IF NOT EXISTS orders (
            id BIGINT PRIMARY KEY DEFAULT nextval('orders_id_seq'),
            user_id BIGINT NOT NULL,
            quantity INTEGER NOT NULL,
            total DOUBLE PRECISION NOT NULL,
            total_mark_up DOUBLE PRECISION NOT NULL,
            total_discount DOUBLE PRECISION NOT NULL,
            status VARCHAR(20) NOT NULL,
            idempotency_key VARCHAR(255) NOT NULL UNIQUE
        )"
        .to_string(),
        format!("CREATE SEQUENCE IF NOT EXISTS product_requests_id_seq AS BIGINT START WITH {base} MINVALUE {base}"),
        "CREATE TABLE IF NOT EXISTS product_requests (
            id BIGINT PRIMARY KEY DEFAULT nextval('product_requests_id_seq'),
            order_id BIGINT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            product_id BIGINT NOT NULL,
            quantity INTEGER NOT NULL,
            mark_up DOUBLE PRECISION NOT NULL,
            discount DOUBLE PRECISION NOT NULL,
            final_price DOUBLE PRECISION NOT NULL
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS product_requests_order_id_idx ON product_requests (order_id)".to_string(),
        "CREATE TABLE IF NOT EXISTS dead_letter_events (
            id UUID PRIMARY KEY,
            order_id BIGINT NOT NULL,
            event_key TEXT NOT NULL,
            event_type VARCHAR(20) NOT NULL,
            payload TEXT NOT NULL,
            error_message TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            first_failed_at TIMESTAMPTZ NOT NULL,
            last_failed_at TIMESTAMPTZ NOT NULL
        )"
        .to_string(),
    ]
}

pub async fn ensure_schema(pool: &PgPool, router: &ShardRouter, shard: usize) -> Result<(), StoreError> {
    for statement in statements(router, shard) {
        sqlx::query(&statement).execute(pool).await?;
    }

    tracing::info!(
        shard,
        id_base = router.id_base(shard),
        "Shard schema ready"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_bounds_follow_shard() {
        let router = ShardRouter::new(3);
        let stmts = statements(&router, 1);

        assert!(stmts[0].contains("START WITH 2000002"));
        assert!(stmts[0].contains("MAXVALUE 3000002"));
        assert!(stmts[2].contains("START WITH 2000002"));
    }

    #[test]
    fn test_line_items_cascade() {
        let stmts = statements(&ShardRouter::new(1), 0);
        assert!(stmts.iter().any(|s| s.contains("REFERENCES orders(id) ON DELETE CASCADE")));
    }
}
