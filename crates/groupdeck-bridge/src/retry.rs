//! Retry policy for bridge calls.
//!
//! Only timeout-flavored failures are retried: a timed-out send may still
//! have landed on the bridge side, so we give the bridge a few widening
//! pauses to settle. Non-timeout failures (bad group, closed session,
//! rejected payload) are deterministic and returned as-is.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::BridgeOutcome;

/// Backoff pauses between attempts. Three retries after the initial call.
pub const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
];

/// Run `op` once, then retry it after each pause in `schedule` for as long
/// as the failure looks like a timeout. Returns the first success, the
/// first non-timeout failure, or the final timeout failure.
pub async fn with_backoff<F, Fut>(schedule: &[Duration], mut op: F) -> BridgeOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BridgeOutcome>,
{
    let mut outcome = op().await;
    for (attempt, pause) in schedule.iter().enumerate() {
        if outcome.success || !outcome.is_timeout() {
            return outcome;
        }
        warn!(
            "⏰ Timeout on attempt {}, retrying in {}s",
            attempt + 1,
            pause.as_secs()
        );
        tokio::time::sleep(*pause).await;
        outcome = op().await;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FAST: [Duration; 3] = [Duration::ZERO; 3];

    #[tokio::test]
    async fn test_success_needs_one_attempt() {
        let calls = AtomicUsize::new(0);
        let out = with_backoff(&FAST, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { BridgeOutcome::ok() }
        })
        .await;
        assert!(out.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_timeout_failure_not_retried() {
        let calls = AtomicUsize::new(0);
        let out = with_backoff(&FAST, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { BridgeOutcome::err("group not found") }
        })
        .await;
        assert!(!out.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let out = with_backoff(&FAST, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    BridgeOutcome::err("Request timeout after 60s")
                } else {
                    BridgeOutcome::ok()
                }
            }
        })
        .await;
        assert!(out.success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_exhausts_schedule() {
        let calls = AtomicUsize::new(0);
        let out = with_backoff(&FAST, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { BridgeOutcome::err("Request timeout after 60s") }
        })
        .await;
        assert!(!out.success);
        assert!(out.is_timeout());
        // Initial attempt plus one per scheduled pause.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
