//! Store capability traits - the contract consumed from the key-value store.
//!
//! The session drives an externally operated consistent store through
//! [`StoreClient`]: single-key reads, conditional writes with TTL
//! leases, and revision-based watches. Implementations wrap whatever
//! transport the deployment uses; the crate ships a deterministic
//! in-memory implementation for tests behind the `test-utils` feature.
//!
//! All implementations must be `Send + Sync`, safe for concurrent use
//! by any number of voter and watcher tasks.

use std::time::Duration;
use std::time::SystemTime;

#[cfg(test)]
use mockall::automock;

use crate::error::StoreResult;

/// Snapshot of a key's state as returned by reads and watch streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// Current value; empty means "no value" (e.g. an expiry event).
    pub value: String,
    /// Revision the store attached to the write that produced this state.
    pub modified_index: u64,
    /// Lease deadline, when the entry carries a TTL.
    pub expires_at: Option<SystemTime>,
}

impl KvEntry {
    /// Lease time left at `now`, saturating at zero. `None` when the
    /// entry has no TTL.
    pub fn remaining_ttl(
        &self,
        now: SystemTime,
    ) -> Option<Duration> {
        self.expires_at
            .map(|at| at.duration_since(now).unwrap_or(Duration::ZERO))
    }
}

/// Client handle to the consistent key-value store.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait StoreClient: Send + Sync {
    /// Reads the current state of `key`.
    ///
    /// # Errors
    /// [`StoreError::NotFound`](crate::StoreError::NotFound) when the
    /// key is absent or its lease has expired.
    async fn get(
        &self,
        key: &str,
    ) -> StoreResult<KvEntry>;

    /// Creates `key` with a lease of `ttl`, failing if it already exists.
    ///
    /// # Errors
    /// [`StoreError::NodeExists`](crate::StoreError::NodeExists) when
    /// another writer created the key first.
    async fn create(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<KvEntry>;

    /// Atomically replaces `key` with a fresh lease of `ttl`, provided
    /// its current value and revision still match `(prev_value,
    /// prev_index)`.
    ///
    /// # Errors
    /// [`StoreError::CasFailed`](crate::StoreError::CasFailed) when the
    /// precondition no longer holds.
    async fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        prev_value: &str,
        prev_index: u64,
    ) -> StoreResult<KvEntry>;

    /// Opens a watch on `key` delivering every state change with a
    /// revision greater than `after_index`, in revision order.
    async fn watch(
        &self,
        key: &str,
        after_index: u64,
    ) -> StoreResult<Box<dyn KeyWatcher>>;
}

/// Blocking iterator over the states a watched key takes.
#[async_trait::async_trait]
pub trait KeyWatcher: Send {
    /// Waits for and returns the next state change.
    ///
    /// # Errors
    /// - [`StoreError::Compacted`](crate::StoreError::Compacted) when
    ///   the requested revision window was compacted away; the caller
    ///   must re-snapshot and re-subscribe.
    /// - [`StoreError::Cluster`](crate::StoreError::Cluster) for
    ///   transport failures; the same watcher may be polled again.
    async fn next(&mut self) -> StoreResult<KvEntry>;
}
