use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{ClientError, HttpCollaborator, PricingClient};
use crate::context::RequestContext;
use crate::domain::order::PriceQuote;

#[derive(Debug, Serialize)]
struct PricingRequest {
    product_id: i64,
}

/// Pricing service client: `POST {base}/pricing` with `{"product_id": id}`.
pub struct HttpPricingClient {
    http: HttpCollaborator,
}

impl HttpPricingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            http: HttpCollaborator::new("pricing", base_url, timeout)?,
        })
    }

    pub fn from_collaborator(http: HttpCollaborator) -> Self {
        Self { http }
    }

    pub fn collaborator(&self) -> &HttpCollaborator {
        &self.http
    }
}

#[async_trait]
impl PricingClient for HttpPricingClient {
    async fn quote(&self, ctx: &RequestContext, product_id: i64) -> Result<PriceQuote, ClientError> {
        let request = self
            .http
            .client()
            .post(self.http.url("/pricing"))
            .json(&PricingRequest { product_id });

        let quote: PriceQuote = self.http.send_json(ctx, request).await?;

        if quote.product_id != product_id {
            return Err(ClientError::Decode(format!(
                "quote for product {} returned for product {product_id}",
                quote.product_id
            )));
        }

        tracing::debug!(
            product_id,
            final_price = quote.final_price,
            markup = quote.markup,
            discount = quote.discount,
            "Fetched price quote"
        );
        Ok(quote)
    }
}
