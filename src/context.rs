use std::fmt;
use std::future::Future;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Request Context
// ============================================================================
//
// Explicit request-scoped values passed down the orchestration call chain:
// the authenticated user, the bearer credential forwarded to collaborators,
// and the cancellation signal / deadline every outbound call observes.
//
// ============================================================================

#[derive(Clone)]
pub struct RequestContext {
    user_id: i64,
    bearer_token: String,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

/// Returned when the request was cancelled or ran past its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request cancelled")]
pub struct Cancelled;

impl RequestContext {
    pub fn new(user_id: i64, bearer_token: impl Into<String>) -> Self {
        Self {
            user_id,
            bearer_token: bearer_token.into(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }

    /// Context sharing identity and deadline whose token is cancelled with the
    /// parent but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            user_id: self.user_id,
            bearer_token: self.bearer_token.clone(),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Drive `fut` to completion unless the request is cancelled or its
    /// deadline passes first, in which case `fut` is dropped.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Err(Cancelled),
                _ = tokio::time::sleep_until(deadline) => Err(Cancelled),
                out = fut => Ok(out),
            },
            None => tokio::select! {
                _ = self.cancel.cancelled() => Err(Cancelled),
                out = fut => Ok(out),
            },
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("user_id", &self.user_id)
            .field("bearer_token", &"<redacted>")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_completes_without_cancellation() {
        let ctx = RequestContext::new(1, "token");
        assert_eq!(ctx.run(async { 5 }).await, Ok(5));
    }

    #[tokio::test]
    async fn test_run_aborts_on_cancel() {
        let ctx = RequestContext::new(1, "token");
        let child = ctx.child();
        ctx.cancel();

        let result = child.run(tokio::time::sleep(Duration::from_secs(10))).await;
        assert_eq!(result, Err(Cancelled));
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_running() {
        let ctx = RequestContext::new(1, "token");
        let child = ctx.child();
        child.cancel();

        assert!(child.is_cancelled());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_aborts_at_deadline() {
        let ctx = RequestContext::new(1, "token").with_timeout(Duration::from_millis(50));
        let result = ctx.run(tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(result, Err(Cancelled));
    }

    #[test]
    fn test_debug_redacts_token() {
        let ctx = RequestContext::new(1, "secret-token");
        assert!(!format!("{ctx:?}").contains("secret-token"));
    }
}
