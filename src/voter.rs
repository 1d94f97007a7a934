//! Voter loop - campaigns to hold a value under a key as a TTL lease.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::store::StoreClient;

/// Shortest term a voter accepts.
pub(crate) const MIN_TERM: Duration = Duration::from_secs(1);

/// Campaign attempts per lease lifetime. Four renewal opportunities per
/// term tolerate up to three consecutive store failures before the
/// lease lapses; the resulting tick stays below term/2 so a healthy
/// lease is renewed before the anti-churn gate opens.
const TICKS_PER_TERM: u32 = 5;

/// Campaign loop body. One election attempt immediately, then one per
/// tick until the session closes. Failures are logged and retried on
/// the next tick, never surfaced.
pub(crate) async fn campaign(
    store: Arc<dyn StoreClient>,
    clock: Arc<dyn Clock>,
    mut shutdown: watch::Receiver<()>,
    key: String,
    value: String,
    term: Duration,
) {
    debug!(key = %key, value = %value, term = ?term, "voter started");
    let mut ticks = interval(term / TICKS_PER_TERM);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!(key = %key, value = %value, "session closing, voter returning");
                return;
            }
            _ = ticks.tick() => {
                if let Err(err) = elect(store.as_ref(), clock.as_ref(), &key, &value, term).await {
                    info!(key = %key, value = %value, error = %err, "voter error");
                }
            }
        }
    }
}

/// One campaign iteration.
///
/// Creates the lease when the key is absent, stands down when another
/// value holds it, and renews its own lease once no more than half the
/// term remains. Races lost on create or renewal are quiet outcomes;
/// only unexpected store failures are returned (to be logged by the
/// caller).
pub(crate) async fn elect(
    store: &dyn StoreClient,
    clock: &dyn Clock,
    key: &str,
    value: &str,
    term: Duration,
) -> StoreResult<()> {
    debug!(key, value, term = ?term, "campaign tick");
    let current = match store.get(key).await {
        Ok(entry) => entry,
        Err(StoreError::NotFound) => {
            debug!(key, value, "key not found, trying to elect myself");
            return match store.create(key, value, term).await {
                Ok(_) => {
                    info!(key, value, "successfully elected");
                    Ok(())
                }
                Err(StoreError::NodeExists) => {
                    debug!(key, value, "another candidate won the creation race");
                    Ok(())
                }
                Err(err) => Err(err),
            };
        }
        Err(err) => return Err(err),
    };

    if current.value != value {
        info!(key, value, leader = %current.value, "another candidate holds the lease");
        return Ok(());
    }

    // Our lease. Leave a healthy one alone so two voters with the same
    // value (e.g. a restart racing the old process) don't hammer the
    // store.
    if let Some(remaining) = current.remaining_ttl(clock.now()) {
        if remaining > term / 2 {
            return Ok(());
        }
    }

    match store
        .compare_and_swap(key, value, term, value, current.modified_index)
        .await
    {
        Ok(_) => {
            debug!(key, value, "extended lease");
            Ok(())
        }
        Err(StoreError::CasFailed) => {
            info!(key, value, "lost lease renewal race, standing down this tick");
            Ok(())
        }
        Err(err) => Err(err),
    }
}
