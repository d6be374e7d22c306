use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards an outbound dependency (broker, stock service, pricing service).
//
// States:
// - Closed: calls pass through
// - Open: calls fail fast until `open_timeout` has elapsed
// - HalfOpen: calls pass; `success_threshold` successes close the circuit,
//   a single failure reopens it
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0=Closed, 1=Open, 2=HalfOpen.
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time spent open before probing again
    pub open_timeout: Duration,
    /// Successes needed in half-open to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit '{0}' is open")]
    CircuitOpen(&'static str),
    #[error("{0}")]
    OperationFailed(E),
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            config,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `operation` unless the circuit is open.
    ///
    /// Errors for which `counts_as_failure` returns false (a 404, a caller
    /// cancellation) pass through without tripping the breaker.
    pub async fn call_with<F, T, E, P>(
        &self,
        operation: F,
        counts_as_failure: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        self.admit().await?;

        match operation.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                if counts_as_failure(&err) {
                    self.record_failure().await;
                }
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.call_with(operation, |_| true).await
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut state = self.state.lock().await;

        if state.state == CircuitState::Open {
            let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed < self.config.open_timeout {
                return Err(CircuitBreakerError::CircuitOpen(self.name));
            }
            tracing::info!(circuit = self.name, "Circuit breaker transitioning to HalfOpen");
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
        }

        Ok(())
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    tracing::info!(circuit = self.name, "Circuit breaker closing");
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.failure_count += 1;

        match state.state {
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                tracing::warn!(
                    circuit = self.name,
                    failures = state.failure_count,
                    "Circuit breaker opening"
                );
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                tracing::warn!(circuit = self.name, "Failure during half-open, reopening circuit");
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        tracing::info!(circuit = self.name, "Circuit breaker manually reset");
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.opened_at = None;
    }
}
