//! Error hierarchy for the election client.
//!
//! Errors are split by who acts on them: [`ConfigError`] is returned
//! synchronously from registration calls and must be fixed by the
//! caller; [`StoreError`] classifies store outcomes that the
//! background loops pattern-match on and never surface.

use std::time::Duration;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a single store operation.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// Invalid configuration or registration arguments
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Store operation failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Operation aborted by session shutdown
    #[error("session is closing")]
    Cancelled,
}

/// Validation failures returned synchronously from the offending call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("need at least one endpoint")]
    NoEndpoints,

    #[error("voter value for key cannot be empty")]
    EmptyVoterValue,

    #[error("term cannot be shorter than {min:?}, got {got:?}")]
    TermTooShort { min: Duration, got: Duration },
}

/// Classified outcome of a key-value store operation.
///
/// The voter and watcher loops dispatch on these kinds; expected
/// outcomes such as [`NotFound`](StoreError::NotFound) on a probe or
/// [`NodeExists`](StoreError::NodeExists) on a contended create drive
/// state transitions and are not treated as failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,

    #[error("node already exists")]
    NodeExists,

    #[error("compare-and-swap precondition failed")]
    CasFailed,

    #[error("watch revision compacted")]
    Compacted,

    #[error("request cancelled")]
    Cancelled,

    /// Aggregated transport failure talking to the store cluster.
    ///
    /// `cancelled` is set when the underlying request was torn down by
    /// a local cancellation rather than a remote fault.
    #[error("cluster error: {message}")]
    Cluster { message: String, cancelled: bool },

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// True for direct cancellation and for cluster errors wrapping one.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            StoreError::Cancelled | StoreError::Cluster { cancelled: true, .. }
        )
    }

    /// True when the key simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    /// True when a create lost to an already existing key.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, StoreError::NodeExists)
    }
}
