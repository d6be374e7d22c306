// ============================================================================
// Collaborator Clients
// ============================================================================
//
// Outbound calls made while validating an order:
// - stock:   how many units of a product are available
// - pricing: per-unit markup, discount and final price of a product
//
// Every call carries the caller's bearer token and observes the request's
// cancellation token and deadline. Non-2xx replies, timeouts, transport and
// decode failures all surface as `ClientError`.
//
// Backends:
// - http:    product and pricing services over reqwest
// - catalog: a fixed in-process catalog for the memory backend
//
// ============================================================================

mod catalog;
mod http;
mod pricing;
mod stock;

pub use catalog::StaticCatalog;
pub use http::HttpCollaborator;
pub use pricing::HttpPricingClient;
pub use stock::HttpStockClient;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::domain::order::PriceQuote;
use crate::utils::IsTransient;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("unexpected status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("circuit '{0}' is open")]
    CircuitOpen(&'static str),

    #[error("request cancelled")]
    Cancelled,
}

impl IsTransient for ClientError {
    fn is_transient(&self) -> bool {
        match self {
            ClientError::Status(code) => *code >= 500 || *code == 429,
            ClientError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::CircuitOpen(_) => true,
            ClientError::Decode(_) | ClientError::Cancelled => false,
        }
    }
}

#[async_trait]
pub trait StockClient: Send + Sync {
    /// Units of `product_id` currently in stock.
    async fn stock_level(&self, ctx: &RequestContext, product_id: i64) -> Result<i64, ClientError>;

    /// Whether at least `quantity` units are in stock.
    async fn check_availability(
        &self,
        ctx: &RequestContext,
        product_id: i64,
        quantity: i32,
    ) -> Result<bool, ClientError> {
        let available = self.stock_level(ctx, product_id).await?;
        Ok(available >= i64::from(quantity))
    }
}

#[async_trait]
pub trait PricingClient: Send + Sync {
    /// Per-unit price of `product_id`; callers scale it by quantity.
    async fn quote(&self, ctx: &RequestContext, product_id: i64) -> Result<PriceQuote, ClientError>;
}
