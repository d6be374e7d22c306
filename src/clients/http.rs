use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;

use super::ClientError;
use crate::context::{Cancelled, RequestContext};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, IsTransient};

/// Shared plumbing for one HTTP collaborator: connection pool, base URL,
/// circuit breaker and call metrics.
pub struct HttpCollaborator {
    client: reqwest::Client,
    base_url: String,
    circuit_breaker: CircuitBreaker,
    metrics: Option<Arc<Metrics>>,
}

impl HttpCollaborator {
    pub fn new(name: &'static str, base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            circuit_breaker: CircuitBreaker::new(name, CircuitBreakerConfig::default()),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &'static str {
        self.circuit_breaker.name()
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }

    /// Send `request` with the caller's bearer token and decode a JSON body.
    ///
    /// Only transient failures count against the circuit breaker, so a
    /// missing product does not take the whole collaborator offline.
    pub async fn send_json<T>(&self, ctx: &RequestContext, request: reqwest::RequestBuilder) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let started = Instant::now();

        let call = async {
            let response = request.bearer_auth(ctx.bearer_token()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ClientError::Status(status.as_u16()));
            }
            response
                .json::<T>()
                .await
                .map_err(|e| ClientError::Decode(e.to_string()))
        };

        let result = match ctx.run(self.circuit_breaker.call_with(call, |e| e.is_transient())).await {
            Err(Cancelled) => Err(ClientError::Cancelled),
            Ok(Ok(value)) => Ok(value),
            Ok(Err(CircuitBreakerError::CircuitOpen(name))) => Err(ClientError::CircuitOpen(name)),
            Ok(Err(CircuitBreakerError::OperationFailed(e))) => Err(e),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_collaborator_call(self.name(), result.is_ok(), started.elapsed().as_secs_f64());
            metrics.update_circuit_breaker_state(self.name(), self.circuit_state().await);
        }

        result
    }
}
