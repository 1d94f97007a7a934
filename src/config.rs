//! Session configuration.

use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::ConfigError;

/// Default time limit to wait for the response header of a single
/// store request.
pub(crate) const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(1);

fn default_header_timeout() -> Duration {
    DEFAULT_HEADER_TIMEOUT
}

/// Configuration for a [`Session`](crate::Session).
///
/// A zero `header_timeout_per_request` is replaced with the 1-second
/// default at open time, so deserialized configs may simply omit it.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Store endpoints the session's client handle is configured
    /// against. At least one is required.
    pub endpoints: Vec<String>,

    /// Per-request response header deadline applied by the store
    /// client layer.
    #[serde(default = "default_header_timeout")]
    pub header_timeout_per_request: Duration,

    /// Time source; defaults to the system clock.
    #[serde(skip)]
    pub clock: Option<Arc<dyn Clock>>,
}

impl SessionConfig {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    /// Validates that the configuration can open a session.
    ///
    /// # Errors
    /// [`ConfigError::NoEndpoints`] when the endpoint list is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            header_timeout_per_request: DEFAULT_HEADER_TIMEOUT,
            clock: None,
        }
    }
}

impl Debug for SessionConfig {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoints", &self.endpoints)
            .field(
                "header_timeout_per_request",
                &self.header_timeout_per_request,
            )
            .finish()
    }
}
