//! Exponential backoff for retrying failed store operations.

use std::cmp;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

/// Exponential delay generator bounded by `[initial, max]`.
///
/// Each call to [`delay`](Backoff::delay) doubles the previous delay
/// until `max` is reached. `tries` counts the delays handed out since
/// the last [`reset`](Backoff::reset), letting callers change strategy
/// after a number of consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    pub tries: u32,
}

impl Backoff {
    pub fn new(
        initial: Duration,
        max: Duration,
    ) -> Self {
        Self {
            initial,
            max,
            tries: 0,
        }
    }

    /// Returns the next delay and advances the counter.
    pub fn delay(&mut self) -> Duration {
        // Cap the exponent; beyond 2^20 the clamp to `max` has long won.
        let exponent = cmp::min(self.tries, 20);
        self.tries += 1;
        let delay = self.initial.saturating_mul(1 << exponent);
        cmp::min(delay, self.max)
    }

    /// Returns the counter to zero; the next delay starts at `initial`.
    pub fn reset(&mut self) {
        self.tries = 0;
    }
}

/// Sleeps for `duration` unless the session shutdown signal fires first.
///
/// Returns `true` when the full duration elapsed, `false` on shutdown.
pub(crate) async fn sleep_or_shutdown(
    shutdown: &mut watch::Receiver<()>,
    duration: Duration,
) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.changed() => false,
        _ = sleep(duration) => true,
    }
}
