//! Session - the owning handle that bounds voter and watcher lifetimes.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::config::SessionConfig;
use crate::config::DEFAULT_HEADER_TIMEOUT;
use crate::error::ConfigError;
use crate::error::Result;
use crate::store::StoreClient;
use crate::voter;
use crate::voter::MIN_TERM;
use crate::watcher;

/// Values buffered between a callback registration's internal watch and
/// its adapter; one keeps per-value handoff semantics.
const CALLBACK_CHANNEL_CAPACITY: usize = 1;

/// Handle for electing leaders under store keys and monitoring the
/// values those keys take.
///
/// Each registration spawns an independent background task owned by
/// this session; the tasks share nothing but the store handle, the
/// clock, and the session's shutdown signal. Registration methods must
/// be called within a tokio runtime.
///
/// A process may hold any number of independent sessions; there is no
/// global state.
pub struct Session {
    store: Arc<dyn StoreClient>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    shutdown_tx: watch::Sender<()>,
    /// Prototype receiver cloned into every spawned task. It never
    /// observes the signal itself, so clones taken after `close` still
    /// see the pending change immediately.
    shutdown_rx: watch::Receiver<()>,
    closed: AtomicBool,
}

impl Session {
    /// Opens a session over a configured store handle.
    ///
    /// Fills configuration defaults (system clock, 1-second per-request
    /// header timeout) and allocates the shutdown channel.
    ///
    /// # Errors
    /// [`ConfigError::NoEndpoints`] when no store endpoint is
    /// configured.
    pub fn open(
        mut config: SessionConfig,
        store: Arc<dyn StoreClient>,
    ) -> Result<Self> {
        config.validate()?;
        if config.header_timeout_per_request.is_zero() {
            config.header_timeout_per_request = DEFAULT_HEADER_TIMEOUT;
        }
        let clock: Arc<dyn Clock> = match config.clock.clone() {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        Ok(Self {
            store,
            clock,
            config,
            shutdown_tx,
            shutdown_rx,
            closed: AtomicBool::new(false),
        })
    }

    /// The configuration the session was opened with, defaults filled.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Launches a campaigner that tries to hold `value` under `key` as
    /// a lease of `term`, renewing it indefinitely.
    ///
    /// # Errors
    /// [`ConfigError::EmptyVoterValue`] or [`ConfigError::TermTooShort`]
    /// when the arguments cannot form a valid campaign. Campaign
    /// failures past this point are logged, never returned.
    pub fn add_voter(
        &self,
        key: &str,
        value: &str,
        term: Duration,
    ) -> Result<()> {
        if value.is_empty() {
            return Err(ConfigError::EmptyVoterValue.into());
        }
        if term < MIN_TERM {
            return Err(ConfigError::TermTooShort {
                min: MIN_TERM,
                got: term,
            }
            .into());
        }
        tokio::spawn(voter::campaign(
            self.store.clone(),
            self.clock.clone(),
            self.shutdown_rx.clone(),
            key.to_owned(),
            value.to_owned(),
            term,
        ));
        Ok(())
    }

    /// Launches a watcher pushing every value `key` takes into
    /// `values_tx`, starting with the current one.
    ///
    /// The stream lives until the session closes or the receiving side
    /// is dropped. Consecutive duplicates may appear; consumers needing
    /// true-change semantics must compare values themselves.
    pub fn add_watch(
        &self,
        key: &str,
        retry_period: Duration,
        values_tx: mpsc::Sender<String>,
    ) {
        tokio::spawn(watcher::watch_key(
            self.store.clone(),
            self.shutdown_rx.clone(),
            key.to_owned(),
            retry_period,
            values_tx,
        ));
    }

    /// Launches a watcher that invokes `callback(key, prev, new)` for
    /// every value `key` takes.
    ///
    /// The first invocation reports the key's current value with
    /// `prev == ""`, so subscribers learn the standing leader
    /// immediately.
    pub fn add_watch_callback<F>(
        &self,
        key: &str,
        retry_period: Duration,
        callback: F,
    ) where
        F: FnMut(&str, &str, &str) + Send + 'static,
    {
        let (values_tx, values_rx) = mpsc::channel(CALLBACK_CHANNEL_CAPACITY);
        self.add_watch(key, retry_period, values_tx);
        tokio::spawn(watcher::callback_adapter(
            self.shutdown_rx.clone(),
            key.to_owned(),
            values_rx,
            callback,
        ));
    }

    /// Stops all background tasks owned by this session.
    ///
    /// Idempotent and non-blocking: the first call signals shutdown
    /// exactly once, later calls return immediately. Tasks observe the
    /// signal within one iteration of their loops; a store write
    /// already in flight is not cancelled, so a just-renewed lease can
    /// outlive the session by up to one term.
    pub fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        debug!("session closing");
        let _ = self.shutdown_tx.send(());
        Ok(())
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
