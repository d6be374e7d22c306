use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ClientError, HttpCollaborator, StockClient};
use crate::context::RequestContext;

#[derive(Debug, Deserialize)]
struct StockResponse {
    stock: i64,
}

/// Product service client: `GET {base}/api/products/{id}/stock`.
pub struct HttpStockClient {
    http: HttpCollaborator,
}

impl HttpStockClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            http: HttpCollaborator::new("stock", base_url, timeout)?,
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
impl StockClient for HttpStockClient {
    async fn stock_level(&self, ctx: &RequestContext, product_id: i64) -> Result<i64, ClientError> {
        let url = self.http.url(&format!("/api/products/{product_id}/stock"));
        let request = self.http.client().get(url);

        let body: StockResponse = self.http.send_json(ctx, request).await?;
        tracing::debug!(product_id, stock = body.stock, "Fetched stock level");
        Ok(body.stock)
    }
}
