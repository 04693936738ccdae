//! Delivery pacing knobs, collected in one struct so tests can zero them.

use std::time::Duration;

use groupdeck_bridge::retry::BACKOFF_SCHEDULE;

#[derive(Debug, Clone)]
pub struct DispatchTiming {
    /// How often the store is polled for due tasks.
    pub poll_interval: Duration,
    /// Pause between consecutive groups of one task. Burst sends to many
    /// groups get the session flagged by the remote platform.
    pub group_pacing: Duration,
    /// Pauses between timeout retries of a single group action.
    pub retry_backoff: [Duration; 3],
    /// How long a freshly reinitialized session gets to settle before the
    /// health re-check.
    pub stabilization: Duration,
}

impl Default for DispatchTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            group_pacing: Duration::from_secs(30),
            retry_backoff: BACKOFF_SCHEDULE,
            stabilization: Duration::from_secs(15),
        }
    }
}

impl DispatchTiming {
    /// All-zero timing for tests.
    pub fn instant() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            group_pacing: Duration::ZERO,
            retry_backoff: [Duration::ZERO; 3],
            stabilization: Duration::ZERO,
        }
    }
}
