//! Deterministic fakes for exercising sessions without a real store.
//!
//! [`MemoryStore`] implements the full store contract in process:
//! TTL leases driven by an injected [`Clock`], compare-and-swap,
//! revision-ordered watch streams with compaction, scripted watch
//! errors, and a write counter for asserting shutdown behavior.
//! [`ManualClock`] is the matching hand-driven time source.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::SystemTime;

use tokio::sync::Notify;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::store::KeyWatcher;
use crate::store::KvEntry;
use crate::store::StoreClient;

/// Hand-driven [`Clock`]. Time moves only through [`advance`](ManualClock::advance).
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(
        &self,
        by: Duration,
    ) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

struct StoredEntry {
    value: String,
    modified_index: u64,
    expires_at: Option<SystemTime>,
}

struct Event {
    index: u64,
    key: String,
    value: String,
}

struct State {
    revision: u64,
    /// First event index still present in the log; everything below
    /// has been compacted away.
    compacted_below: u64,
    entries: HashMap<String, StoredEntry>,
    events: Vec<Event>,
    injected_watch_errors: VecDeque<StoreError>,
}

struct StoreInner {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    notify: Notify,
    write_count: AtomicU64,
}

impl StoreInner {
    /// Removes entries whose lease elapsed, recording an empty-value
    /// event for each, the way a TTL store reports expirations.
    /// Returns whether anything expired.
    fn expire_locked(
        state: &mut State,
        now: SystemTime,
    ) -> bool {
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.remove(key);
            state.revision += 1;
            let index = state.revision;
            state.events.push(Event {
                index,
                key: key.clone(),
                value: String::new(),
            });
        }
        !expired.is_empty()
    }

    fn record_write_locked(
        state: &mut State,
        key: &str,
        value: &str,
        ttl: Duration,
        now: SystemTime,
    ) -> KvEntry {
        state.revision += 1;
        let index = state.revision;
        let expires_at = (!ttl.is_zero()).then(|| now + ttl);
        state.entries.insert(
            key.to_owned(),
            StoredEntry {
                value: value.to_owned(),
                modified_index: index,
                expires_at,
            },
        );
        state.events.push(Event {
            index,
            key: key.to_owned(),
            value: value.to_owned(),
        });
        KvEntry {
            value: value.to_owned(),
            modified_index: index,
            expires_at,
        }
    }
}

/// In-process store with etcd-like single-key semantics.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                clock,
                state: Mutex::new(State {
                    revision: 0,
                    compacted_below: 1,
                    entries: HashMap::new(),
                    events: Vec::new(),
                    injected_watch_errors: VecDeque::new(),
                }),
                notify: Notify::new(),
                write_count: AtomicU64::new(0),
            }),
        }
    }

    /// Number of client-initiated writes (creates and swaps) so far.
    pub fn write_count(&self) -> u64 {
        self.inner.write_count.load(Ordering::SeqCst)
    }

    /// Writes `key` unconditionally without a lease. Test scaffolding;
    /// does not count as a client write.
    pub fn put(
        &self,
        key: &str,
        value: &str,
    ) -> u64 {
        let index = {
            let mut state = self.inner.state.lock().unwrap();
            let now = self.inner.clock.now();
            StoreInner::expire_locked(&mut state, now);
            StoreInner::record_write_locked(&mut state, key, value, Duration::ZERO, now)
                .modified_index
        };
        self.inner.notify.notify_waiters();
        index
    }

    /// Deletes `key`, recording the empty-value event a store reports
    /// for deletions.
    pub fn delete(
        &self,
        key: &str,
    ) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.entries.remove(key).is_none() {
                return;
            }
            state.revision += 1;
            let index = state.revision;
            state.events.push(Event {
                index,
                key: key.to_owned(),
                value: String::new(),
            });
        }
        self.inner.notify.notify_waiters();
    }

    /// Discards the whole event log, as a store-side history compaction
    /// would. Watchers behind the cut observe `Compacted`.
    pub fn compact(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.compacted_below = state.revision + 1;
            state.events.clear();
        }
        self.inner.notify.notify_waiters();
    }

    /// Scripts the next watch poll to fail with `err`. Errors are
    /// consumed in injection order across all watchers of this store.
    pub fn inject_watch_error(
        &self,
        err: StoreError,
    ) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.injected_watch_errors.push_back(err);
        }
        self.inner.notify.notify_waiters();
    }
}

#[async_trait::async_trait]
impl StoreClient for MemoryStore {
    async fn get(
        &self,
        key: &str,
    ) -> StoreResult<KvEntry> {
        let (entry, expired) = {
            let mut state = self.inner.state.lock().unwrap();
            let now = self.inner.clock.now();
            let expired = StoreInner::expire_locked(&mut state, now);
            let entry = state.entries.get(key).map(|entry| KvEntry {
                value: entry.value.clone(),
                modified_index: entry.modified_index,
                expires_at: entry.expires_at,
            });
            (entry, expired)
        };
        if expired {
            self.inner.notify.notify_waiters();
        }
        entry.ok_or(StoreError::NotFound)
    }

    async fn create(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<KvEntry> {
        let result = {
            let mut state = self.inner.state.lock().unwrap();
            let now = self.inner.clock.now();
            StoreInner::expire_locked(&mut state, now);
            if state.entries.contains_key(key) {
                Err(StoreError::NodeExists)
            } else {
                Ok(StoreInner::record_write_locked(
                    &mut state, key, value, ttl, now,
                ))
            }
        };
        if result.is_ok() {
            self.inner.write_count.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.notify.notify_waiters();
        result
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        prev_value: &str,
        prev_index: u64,
    ) -> StoreResult<KvEntry> {
        let result = {
            let mut state = self.inner.state.lock().unwrap();
            let now = self.inner.clock.now();
            StoreInner::expire_locked(&mut state, now);
            match state.entries.get(key) {
                None => Err(StoreError::NotFound),
                Some(entry)
                    if entry.value != prev_value || entry.modified_index != prev_index =>
                {
                    Err(StoreError::CasFailed)
                }
                Some(_) => Ok(StoreInner::record_write_locked(
                    &mut state, key, value, ttl, now,
                )),
            }
        };
        if result.is_ok() {
            self.inner.write_count.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.notify.notify_waiters();
        result
    }

    async fn watch(
        &self,
        key: &str,
        after_index: u64,
    ) -> StoreResult<Box<dyn KeyWatcher>> {
        Ok(Box::new(MemoryWatcher {
            inner: self.inner.clone(),
            key: key.to_owned(),
            cursor: after_index,
        }))
    }
}

struct MemoryWatcher {
    inner: Arc<StoreInner>,
    key: String,
    cursor: u64,
}

impl MemoryWatcher {
    fn poll_once(&mut self) -> Option<StoreResult<KvEntry>> {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(err) = state.injected_watch_errors.pop_front() {
            return Some(Err(err));
        }
        let now = self.inner.clock.now();
        if StoreInner::expire_locked(&mut state, now) {
            self.inner.notify.notify_waiters();
        }
        if self.cursor + 1 < state.compacted_below {
            return Some(Err(StoreError::Compacted));
        }
        if let Some(event) = state
            .events
            .iter()
            .find(|event| event.index > self.cursor && event.key == self.key)
        {
            let entry = KvEntry {
                value: event.value.clone(),
                modified_index: event.index,
                expires_at: None,
            };
            self.cursor = event.index;
            return Some(Ok(entry));
        }
        None
    }
}

#[async_trait::async_trait]
impl KeyWatcher for MemoryWatcher {
    async fn next(&mut self) -> StoreResult<KvEntry> {
        loop {
            let inner = self.inner.clone();
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            // Register before polling so a write racing the poll still
            // wakes this watcher.
            notified.as_mut().enable();
            if let Some(result) = self.poll_once() {
                return result;
            }
            notified.await;
        }
    }
}
