use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ClientError, PricingClient, StockClient};
use crate::context::RequestContext;
use crate::domain::order::PriceQuote;

// ============================================================================
// Static Catalog
// ============================================================================
//
// In-process stand-in for the product and pricing services, used by the
// memory backend. Answers observe the request context like the HTTP clients
// do, and can be slowed down or made to fail per product.
//
// ============================================================================

#[derive(Default)]
pub struct StaticCatalog {
    stock: RwLock<HashMap<i64, i64>>,
    prices: RwLock<HashMap<i64, PriceQuote>>,
    failing: RwLock<HashSet<i64>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn set_product(&self, product_id: i64, stock: i64, markup: f64, discount: f64, final_price: f64) {
        self.stock.write().await.insert(product_id, stock);
        self.prices.write().await.insert(
            product_id,
            PriceQuote {
                product_id,
                markup,
                discount,
                final_price,
            },
        );
    }

    pub async fn set_stock(&self, product_id: i64, stock: i64) {
        self.stock.write().await.insert(product_id, stock);
    }

    /// Answer every call about `product_id` with a 503.
    pub async fn fail_product(&self, product_id: i64) {
        self.failing.write().await.insert(product_id);
    }

    /// Highest number of calls that were ever in progress at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer<T>(
        &self,
        ctx: &RequestContext,
        product_id: i64,
        lookup: impl std::future::Future<Output = Option<T>>,
    ) -> Result<T, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = ctx
            .run(async {
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                if self.failing.read().await.contains(&product_id) {
                    return Err(ClientError::Status(503));
                }
                lookup.await.ok_or(ClientError::Status(404))
            })
            .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result.map_err(|_| ClientError::Cancelled)?
    }
}

#[async_trait]
impl StockClient for StaticCatalog {
    async fn stock_level(&self, ctx: &RequestContext, product_id: i64) -> Result<i64, ClientError> {
        self.answer(ctx, product_id, async { self.stock.read().await.get(&product_id).copied() })
            .await
    }
}

#[async_trait]
impl PricingClient for StaticCatalog {
    async fn quote(&self, ctx: &RequestContext, product_id: i64) -> Result<PriceQuote, ClientError> {
        self.answer(ctx, product_id, async { self.prices.read().await.get(&product_id).copied() })
            .await
    }
}
