//! # electorate
//!
//! Lease-based leader election and key watching over an externally
//! operated consistent key-value store.
//!
//! Any number of nodes can campaign for a named role by holding a
//! short-lived lease under a store key, and observe the values
//! arbitrary keys take over time:
//!
//! - **Voters** campaign for a `(key, value)` pair by creating the key
//!   with a TTL and extending the lease with compare-and-swap renewals
//!   while they hold it. At most one value is held per key at any
//!   revision; losing a renewal race simply means standing down until
//!   the next tick.
//! - **Watchers** stream every non-empty value a key takes, starting
//!   with the current one, self-healing across transport errors and
//!   watch-window compaction.
//! - A **session** owns all of the above and shuts them down
//!   idempotently.
//!
//! The store itself is consumed behind the [`StoreClient`] capability
//! trait (single-key reads, conditional writes with TTL, revision
//! watches); the clock behind [`Clock`]. Deterministic in-memory
//! implementations of both ship behind the `test-utils` feature.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use electorate::Session;
//! use electorate::SessionConfig;
//!
//! let config = SessionConfig::new(vec!["https://store1:2379".into()]);
//! let session = Session::open(config, store_handle)?;
//!
//! // Campaign to be the master, and learn who is.
//! session.add_voter("/planet/cluster/master", "node-1", Duration::from_secs(5))?;
//! session.add_watch_callback("/planet/cluster/master", Duration::from_secs(1),
//!     |key, prev, new| println!("{key}: {prev:?} -> {new:?}"));
//!
//! // ... later
//! session.close()?;
//! ```
//!
//! # Error handling
//!
//! Only registration-time configuration problems are returned to the
//! caller. The background loops embody a reconciler: transient store
//! failures are logged and retried with exponential backoff, expected
//! outcomes (a lost creation race, a missing key) drive state
//! transitions silently, and nothing requires supervision until
//! [`Session::close`].

mod backoff;
mod clock;
mod config;
mod error;
mod session;
mod store;
mod voter;
mod watcher;

pub use backoff::Backoff;
pub use clock::Clock;
pub use clock::SystemClock;
pub use config::SessionConfig;
pub use error::ConfigError;
pub use error::Error;
pub use error::Result;
pub use error::StoreError;
pub use error::StoreResult;
pub use session::Session;
pub use store::KeyWatcher;
pub use store::KvEntry;
pub use store::StoreClient;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod backoff_test;
#[cfg(test)]
mod error_test;
#[cfg(test)]
mod watcher_test;
