//! Failure/retry kernel for external collaborator calls.
//!
//! Every LLM/TTS/filesystem call goes through [`with_retry`], which applies
//! a per-attempt timeout and a bounded backoff for transient errors.
//! Non-transient errors (malformed output) return immediately so the stage
//! layer can run its single repair retry and then degrade.

use std::future::Future;
use std::time::Duration;

use crate::agent::CollaboratorError;

/// Retry delays for transient collaborator errors (bounded retry of 2).
const RETRY_DELAYS_MS: [u64; 2] = [200, 500];

/// Executes a collaborator call with a per-attempt timeout and retry logic
/// for transient errors.
///
/// # Arguments
/// * `action` - Action name for logging
/// * `timeout` - Per-attempt timeout; an elapsed attempt counts as transient
/// * `operation` - Closure that performs the call
pub async fn with_retry<T, F, Fut>(
    action: &str,
    timeout: Duration,
    mut operation: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut last_error = None;
    for (attempt, &delay_ms) in std::iter::once(&0)
        .chain(RETRY_DELAYS_MS.iter())
        .enumerate()
    {
        if attempt > 0 {
            log::info!(
                "[Retry] Retrying {} (attempt {}/{}) after {}ms",
                action,
                attempt + 1,
                RETRY_DELAYS_MS.len() + 1,
                delay_ms
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let outcome = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(timeout)),
        };

        match outcome {
            Ok(r) => return Ok(r),
            Err(e) if e.is_transient() => {
                log::warn!("[Retry] {} transient error: {}", action, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.expect("retry loop should have set last_error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = with_retry("test", Duration::from_secs(1), move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CollaboratorError::Transport("connection reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_output_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<u32, _> = with_retry("test", Duration::from_secs(1), move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CollaboratorError::Malformed("not json".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(CollaboratorError::Malformed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_transient_error() {
        let result: Result<u32, _> = with_retry("test", Duration::from_secs(1), || async {
            Err(CollaboratorError::Http {
                status: 503,
                detail: "overloaded".into(),
            })
        })
        .await;

        assert!(matches!(
            result,
            Err(CollaboratorError::Http { status: 503, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_as_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = with_retry("test", Duration::from_millis(50), move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
