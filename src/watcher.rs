//! Key watching - long-lived per-key observers that stream values.
//!
//! A watcher seeds itself with the key's current value, subscribes at
//! that revision, and then forwards every non-empty value the store
//! reports, in revision order. It self-heals across transport errors
//! and watch-window compaction, and terminates only when the session
//! shuts down or the consumer goes away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;

use crate::backoff::sleep_or_shutdown;
use crate::backoff::Backoff;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::store::KeyWatcher;
use crate::store::KvEntry;
use crate::store::StoreClient;

/// Consecutive unknown errors tolerated before the watch is torn down
/// and re-established from a fresh snapshot.
const MAX_UNKNOWN_ERRORS: u32 = 10;

const BACKOFF_INITIAL: Duration = Duration::from_millis(50);
const BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Waits until `key` has a value and returns its snapshot.
///
/// `NotFound` is the expected "no value yet" outcome and retries
/// quietly after `retry_period`; other store errors are logged and
/// retried on the same cadence. Returns `None` when the session shuts
/// down first - the no-result-no-error sentinel that lets callers tell
/// shutdown from failure.
pub(crate) async fn get_first_value(
    store: &dyn StoreClient,
    shutdown: &mut watch::Receiver<()>,
    key: &str,
    retry_period: Duration,
) -> Option<KvEntry> {
    loop {
        match store.get(key).await {
            Ok(entry) => return Some(entry),
            Err(StoreError::NotFound) => {
                trace!(key, "key has no value yet, retrying");
            }
            Err(err) => {
                info!(key, error = %err, "unexpected error reading current value, retrying");
            }
        }
        if !sleep_or_shutdown(shutdown, retry_period).await {
            debug!(key, "session closing, first-value probe returning");
            return None;
        }
    }
}

enum Established {
    Watching(Box<dyn KeyWatcher>, KvEntry),
    Shutdown,
}

/// Takes a snapshot of the key and subscribes right after its revision,
/// so no transition between snapshot and subscription can be lost.
async fn establish(
    store: &dyn StoreClient,
    shutdown: &mut watch::Receiver<()>,
    key: &str,
    retry_period: Duration,
) -> StoreResult<Established> {
    let snapshot = match get_first_value(store, shutdown, key, retry_period).await {
        Some(snapshot) => snapshot,
        None => return Ok(Established::Shutdown),
    };
    debug!(
        key,
        value = %snapshot.value,
        index = snapshot.modified_index,
        "watch reset at current value"
    );
    let watcher = store.watch(key, snapshot.modified_index).await?;
    Ok(Established::Watching(watcher, snapshot))
}

async fn send_value(
    shutdown: &mut watch::Receiver<()>,
    values_tx: &mpsc::Sender<String>,
    key: &str,
    value: String,
) -> bool {
    trace!(key, value = %value, "emitting value");
    tokio::select! {
        biased;
        _ = shutdown.changed() => false,
        result = values_tx.send(value) => match result {
            Ok(()) => true,
            Err(_) => {
                debug!(key, "values receiver dropped, stopping watch");
                false
            }
        },
    }
}

/// Sleeps one backoff delay, except for the first try in a streak.
async fn backoff_sleep(
    backoff: &mut Backoff,
    shutdown: &mut watch::Receiver<()>,
    key: &str,
) -> bool {
    let delay = backoff.delay();
    if backoff.tries <= 1 {
        return true;
    }
    debug!(key, delay = ?delay, "backing off");
    sleep_or_shutdown(shutdown, delay).await
}

/// Watch loop body. Runs until the session closes or `values_tx` loses
/// its receiver.
pub(crate) async fn watch_key(
    store: Arc<dyn StoreClient>,
    mut shutdown: watch::Receiver<()>,
    key: String,
    retry_period: Duration,
    values_tx: mpsc::Sender<String>,
) {
    let mut backoff = Backoff::new(BACKOFF_INITIAL, BACKOFF_MAX);
    let mut unknown_errors: u32 = 0;
    let mut current: Option<Box<dyn KeyWatcher>> = None;

    loop {
        let watcher = match current {
            Some(ref mut watcher) => watcher,
            None => {
                match establish(store.as_ref(), &mut shutdown, &key, retry_period).await {
                    Ok(Established::Shutdown) => {
                        debug!(key = %key, "session closing, watcher returning");
                        return;
                    }
                    Ok(Established::Watching(watcher, snapshot)) => {
                        unknown_errors = 0;
                        if !snapshot.value.is_empty() {
                            if !send_value(&mut shutdown, &values_tx, &key, snapshot.value).await {
                                return;
                            }
                            backoff.reset();
                        }
                        current = Some(watcher);
                    }
                    Err(err) if err.is_cancelled() => {
                        debug!(key = %key, "session closing, watcher returning");
                        return;
                    }
                    Err(err) => {
                        // A failed reset counts against the same streak
                        // as any other unknown error.
                        unknown_errors += 1;
                        info!(key = %key, error = %err, "failed to reset watch");
                        if !backoff_sleep(&mut backoff, &mut shutdown, &key).await {
                            return;
                        }
                    }
                }
                continue;
            }
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!(key = %key, "session closing, watcher returning");
                return;
            }
            result = watcher.next() => result,
        };

        match result {
            Ok(entry) => {
                unknown_errors = 0;
                if entry.value.is_empty() {
                    trace!(key = %key, index = entry.modified_index, "skipping empty value");
                    continue;
                }
                if !send_value(&mut shutdown, &values_tx, &key, entry.value).await {
                    return;
                }
                backoff.reset();
            }
            Err(err) if err.is_cancelled() => {
                debug!(key = %key, "watch cancelled, returning");
                return;
            }
            Err(StoreError::Compacted) => {
                info!(key = %key, "watch revision compacted, resetting watch");
                current = None;
            }
            Err(err @ StoreError::Cluster { .. }) => {
                info!(key = %key, error = %err, "cluster error, retrying watch");
                if !backoff_sleep(&mut backoff, &mut shutdown, &key).await {
                    return;
                }
            }
            Err(err) => {
                unknown_errors += 1;
                info!(
                    key = %key,
                    error = %err,
                    consecutive = unknown_errors,
                    "unexpected watch error"
                );
                if !backoff_sleep(&mut backoff, &mut shutdown, &key).await {
                    return;
                }
                if unknown_errors > MAX_UNKNOWN_ERRORS {
                    info!(key = %key, "repeated unknown errors, resetting watch");
                    current = None;
                }
            }
        }
    }
}

/// Bridges a value stream into `(key, prev, new)` callback invocations.
///
/// `prev` starts empty, so the first invocation reports the key's
/// current value against `""`. Repeats are delivered as received.
pub(crate) async fn callback_adapter<F>(
    mut shutdown: watch::Receiver<()>,
    key: String,
    mut values_rx: mpsc::Receiver<String>,
    mut callback: F,
) where
    F: FnMut(&str, &str, &str) + Send + 'static,
{
    let mut prev = String::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!(key = %key, "session closing, callback watch returning");
                return;
            }
            value = values_rx.recv() => match value {
                Some(value) => {
                    callback(&key, &prev, &value);
                    prev = value;
                }
                None => return,
            },
        }
    }
}
