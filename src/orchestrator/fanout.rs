use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::RequestContext;
use crate::domain::order::OrderError;

/// Run `check` for every job concurrently, never more than `limit` at once.
///
/// Every job runs under a child of `ctx`. The first failure cancels that
/// child so in-flight siblings abort; every spawned task is still joined
/// before returning, and only that first failure is reported. On success
/// the outputs come back in job order.
pub(crate) async fn run_bounded<J, T, F, Fut>(
    ctx: &RequestContext,
    limit: usize,
    jobs: Vec<J>,
    check: F,
) -> Result<Vec<T>, OrderError>
where
    F: Fn(RequestContext, J) -> Fut,
    Fut: Future<Output = Result<T, OrderError>> + Send + 'static,
    T: Send + 'static,
{
    let scope = ctx.child();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();
    let job_count = jobs.len();

    for (index, job) in jobs.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let task_ctx = scope.clone();
        let work = check(scope.clone(), job);

        tasks.spawn(async move {
            let _permit = match task_ctx.run(semaphore.acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) | Err(_) => return (index, Err(OrderError::Cancelled)),
            };
            (index, work.await)
        });
    }

    let mut outputs: Vec<Option<T>> = (0..job_count).map(|_| None).collect();
    let mut first_error: Option<OrderError> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(value))) => outputs[index] = Some(value),
            Ok((_, Err(err))) => {
                if first_error.is_none() {
                    scope.cancel();
                    first_error = Some(err);
                }
            }
            Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
            Err(_) => {
                if first_error.is_none() {
                    scope.cancel();
                    first_error = Some(OrderError::Cancelled);
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    // Outer cancellation can only surface as an error above, so every slot
    // is filled here.
    outputs
        .into_iter()
        .map(|output| output.ok_or(OrderError::Cancelled))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_outputs_keep_job_order() {
        let ctx = RequestContext::new(1, "token");
        let jobs = vec![30u64, 10, 20];

        let out = run_bounded(&ctx, 3, jobs, |_, delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(delay)
        })
        .await
        .unwrap();

        assert_eq!(out, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let ctx = RequestContext::new(1, "token");
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = run_bounded(&ctx, 2, (0..8).collect::<Vec<_>>(), |_, job| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(job)
            }
        })
        .await
        .unwrap();

        assert_eq!(out.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_first_failure_cancels_siblings() {
        let ctx = RequestContext::new(1, "token");
        let finished = Arc::new(AtomicUsize::new(0));

        let result = run_bounded(&ctx, 4, vec![0u64, 1, 2, 3], |task_ctx, job| {
            let finished = Arc::clone(&finished);
            async move {
                if job == 0 {
                    return Err(OrderError::validation(Some(0), "out of stock"));
                }
                task_ctx.run(tokio::time::sleep(Duration::from_secs(5))).await?;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(job)
            }
        })
        .await;

        assert!(matches!(result, Err(OrderError::Validation { product_id: Some(0), .. })));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_outer_cancellation_aborts() {
        let ctx = RequestContext::new(1, "token");
        ctx.cancel();

        let result = run_bounded(&ctx, 2, vec![1, 2], |_, job| async move { Ok(job) }).await;
        assert!(matches!(result, Err(OrderError::Cancelled)));
    }
}
