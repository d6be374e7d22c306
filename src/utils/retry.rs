use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff Retry
// ============================================================================
//
// Used for work that happens after a commit and may be retried freely
// (publishing lifecycle events, dead-letter writes). Request-path calls to
// collaborators are not retried here: the caller owns the retry decision via
// the idempotency key.
//
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Out-of-band event redelivery: patient, since nothing waits on it.
    pub fn for_redelivery() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

/// Classifies an error as retryable.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded on attempt `attempts`
    Success { value: T, attempts: u32 },
    /// Every attempt failed with a transient error
    Exhausted { error: E, attempts: u32 },
    /// A non-transient error stopped the retries early
    Permanent { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. }
            | RetryResult::Exhausted { attempts, .. }
            | RetryResult::Permanent { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Exhausted { error, .. } | RetryResult::Permanent { error, .. } => Err(error),
        }
    }
}

/// Retry every failure until `max_attempts` is reached.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    run(config, operation, |_| true).await
}

/// Retry only errors reporting themselves as transient.
pub async fn retry_on_transient<F, Fut, T, E>(config: &RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    run(config, operation, |e: &E| e.is_transient()).await
}

async fn run<F, Fut, T, E, C>(config: &RetryConfig, mut operation: F, retryable: C) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return RetryResult::Success { value, attempts: attempt };
            }
            Err(error) if !retryable(&error) => {
                tracing::error!(attempt, error = %error, "Permanent failure, not retrying");
                return RetryResult::Permanent { error, attempts: attempt };
            }
            Err(error) if attempt >= config.max_attempts => {
                tracing::error!(attempt, error = %error, "Operation failed after all retries");
                return RetryResult::Exhausted { error, attempts: attempt };
            }
            Err(error) => {
                let delay = config.delay_after(attempt);
                tracing::warn!(
                    attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying after delay"
                );
                sleep(delay).await;
            }
        }
    }
}
