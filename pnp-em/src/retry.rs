//! Bounded retry for message processing
//!
//! Transient failures (storage contention, timeouts, catalog outages) are
//! retried indefinitely with a fixed backoff: the message bus has already
//! delivered the message, so giving up would drop it. Permanent failures
//! (malformed payloads, validation rejections) are never retried; they are
//! logged with their taxonomy tag and the message is discarded.

use crate::error::{ErrorTag, PipelineError};
use crate::reconcile::Action;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Final disposition of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing finished, possibly after retries
    Completed(Action),
    /// Permanent failure; the message was discarded
    Discarded(ErrorTag),
    /// Shutdown was requested while waiting to retry
    Shutdown,
}

/// Run a message-processing operation, retrying transient failures until it
/// completes, fails permanently, or shutdown interrupts the backoff wait.
pub async fn run_with_retry<F, Fut>(
    operation_name: &str,
    backoff: Duration,
    shutdown: &CancellationToken,
    mut operation: F,
) -> Disposition
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Action, PipelineError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(action) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt,
                        action = action.as_str(),
                        "Operation succeeded after retry"
                    );
                }
                return Disposition::Completed(action);
            }
            Err(PipelineError::Permanent { tag, message }) => {
                warn!(
                    operation = operation_name,
                    tag = tag.as_str(),
                    %message,
                    "Permanent failure, discarding message"
                );
                return Disposition::Discarded(tag);
            }
            Err(PipelineError::Transient { message }) => {
                warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    %message,
                    "Transient failure, will retry after backoff"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return Disposition::Shutdown,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn success_returns_on_first_attempt() {
        let shutdown = CancellationToken::new();
        let disposition = run_with_retry("test", Duration::from_millis(1), &shutdown, || async {
            Ok(Action::Inserted)
        })
        .await;
        assert_eq!(disposition, Disposition::Completed(Action::Inserted));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let shutdown = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let disposition = run_with_retry("test", Duration::from_millis(1), &shutdown, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::transient("storage busy"))
                } else {
                    Ok(Action::Updated)
                }
            }
        })
        .await;

        assert_eq!(disposition, Disposition::Completed(Action::Updated));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let shutdown = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let disposition = run_with_retry("test", Duration::from_millis(1), &shutdown, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::malformed("bad timestamp")) }
        })
        .await;

        assert_eq!(disposition, Disposition::Discarded(ErrorTag::ParseError));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_backoff_wait() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let disposition = run_with_retry("test", Duration::from_secs(60), &shutdown, || async {
            Err(PipelineError::transient("storage busy"))
        })
        .await;

        assert_eq!(disposition, Disposition::Shutdown);
    }
}
