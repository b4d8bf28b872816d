//! # Whitelist Sync Coordinator
//!
//! Orchestrates a sync cycle against the remote artist whitelist.
//!
//! ## Overview
//!
//! The coordinator is the only writer of [`SyncState`]. It is driven by three
//! triggers that all funnel into the same cycle:
//! - **Startup**: [`SyncCoordinator::sync_blocking`] waits for the cycle at
//!   most `startup_timeout`; past that the app continues on the last
//!   persisted snapshot.
//! - **Background**: [`SyncCoordinator::start_background_loop`] re-runs the
//!   cycle every `background_interval`.
//! - **Manual**: [`SyncCoordinator::sync_now`] for user-initiated refreshes.
//!
//! At most one cycle runs at a time. A trigger that arrives while a cycle is
//! in flight waits for that cycle's outcome instead of starting another.
//!
//! ## Workflow
//!
//! 1. `Fetching`: fetch the remote list, retrying transient failures
//! 2. Compare the content hash with the persisted snapshot; stop if equal
//! 3. `Diffing`: compute added and removed artists
//! 4. `Cleaning`: plan and apply the cascade for removed artists
//! 5. Commit the new snapshot (in the cleanup transaction when there is one)
//! 6. Publish `Succeeded` or `Failed`
//!
//! Cycles run on their own task. Abandoning a caller, e.g. on startup
//! timeout, never interrupts a cycle in the middle of a transaction.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_whitelist::{SyncConfig, SyncCoordinator};
//!
//! let coordinator = SyncCoordinator::new(config, fetcher, store, event_bus, clock);
//! if let Err(e) = coordinator.sync_blocking(Duration::from_secs(5)).await {
//!     warn!("Continuing with last known whitelist: {}", e);
//! }
//! let _handle = coordinator.start_background_loop(Duration::from_secs(3600));
//! ```

use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_library::models::{CleanupReport, WhitelistSnapshot};
use core_library::repositories::WhitelistStore;
use core_library::StorageResult;
use core_runtime::config::{
    FetchRetryPolicy, WhitelistConfig, DEFAULT_BACKGROUND_INTERVAL, DEFAULT_STARTUP_TIMEOUT,
};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, WhitelistEvent};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cleanup::CascadeCleanupEngine;
use crate::diff::diff;
use crate::error::{FetchResult, Result, SyncError};
use crate::fetcher::{RemotePayload, WhitelistFetcher};
use crate::progress::{ProgressPublisher, SyncPhase, SyncState, DEFAULT_PROGRESS_CAPACITY};

/// Sync configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long `sync_blocking` waits at startup
    pub startup_timeout: Duration,

    /// Period of the background loop
    pub background_interval: Duration,

    /// Retry policy for transient fetch failures
    pub retry_policy: FetchRetryPolicy,

    /// Whether the service should start the background loop
    pub enable_background_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            background_interval: DEFAULT_BACKGROUND_INTERVAL,
            retry_policy: FetchRetryPolicy::default(),
            enable_background_sync: true,
        }
    }
}

impl From<&WhitelistConfig> for SyncConfig {
    fn from(config: &WhitelistConfig) -> Self {
        Self {
            startup_timeout: config.startup_timeout,
            background_interval: config.background_interval,
            retry_policy: config.retry_policy,
            enable_background_sync: config.features.enable_background_sync,
        }
    }
}

/// Identifier of one sync cycle, used to correlate logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CycleId(Uuid);

impl CycleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
    Startup,
    Background,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Startup => "startup",
            SyncTrigger::Background => "background",
            SyncTrigger::Manual => "manual",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub cycle_id: CycleId,
    /// Hash of the snapshot in effect after the cycle
    pub content_hash: String,
    pub added: usize,
    pub removed: usize,
    /// The remote hash matched and nothing was written
    pub unchanged: bool,
    pub cleanup: CleanupReport,
}

impl SyncReport {
    pub fn changed_count(&self) -> usize {
        self.added + self.removed
    }
}

/// Outcome shared by every caller coalesced onto one cycle.
pub type SyncOutcome = Result<SyncReport>;

type SharedCycle = Shared<BoxFuture<'static, SyncOutcome>>;

struct InFlight {
    cycle_id: CycleId,
    outcome: SharedCycle,
}

/// Handle to a running background loop.
///
/// Dropping the handle leaves the loop running; call [`stop`](Self::stop)
/// or [`SyncCoordinator::stop_background_loop`].
pub struct BackgroundSyncHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl BackgroundSyncHandle {
    /// Ask the loop to stop. A cycle already running finishes on its own.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.task.is_finished()
    }

    /// Stop the loop and wait for its task to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Background sync task ended abnormally: {}", e);
        }
    }
}

struct CoordinatorInner {
    config: SyncConfig,
    fetcher: Arc<dyn WhitelistFetcher>,
    store: Arc<dyn WhitelistStore>,
    cleanup: CascadeCleanupEngine,
    progress: Arc<ProgressPublisher>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    in_flight: tokio::sync::Mutex<Option<InFlight>>,
}

/// Sync coordinator for the artist whitelist
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,

    /// Cancellation token of the current background loop
    background: Mutex<Option<CancellationToken>>,
}

impl SyncCoordinator {
    /// Create a new sync coordinator
    ///
    /// # Arguments
    ///
    /// * `config` - Sync configuration
    /// * `fetcher` - Source of the remote whitelist
    /// * `store` - Storage contract for the snapshot and catalog
    /// * `event_bus` - Event bus for sync and purge events
    /// * `clock` - Time source for snapshot and state timestamps
    pub fn new(
        config: SyncConfig,
        fetcher: Arc<dyn WhitelistFetcher>,
        store: Arc<dyn WhitelistStore>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = CoordinatorInner {
            config,
            fetcher,
            cleanup: CascadeCleanupEngine::new(store.clone()),
            store,
            progress: Arc::new(ProgressPublisher::new(DEFAULT_PROGRESS_CAPACITY)),
            event_bus,
            clock,
            in_flight: tokio::sync::Mutex::new(None),
        };

        Self {
            inner: Arc::new(inner),
            background: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Observable sync state
    pub fn progress(&self) -> Arc<ProgressPublisher> {
        self.inner.progress.clone()
    }

    /// The snapshot currently in effect.
    pub async fn current_snapshot(&self) -> StorageResult<Option<WhitelistSnapshot>> {
        self.inner.store.get_snapshot().await
    }

    /// Run the startup sync, waiting at most `timeout`.
    ///
    /// Failure is soft: the previous snapshot stays in effect and the caller
    /// is expected to continue. On timeout the cycle keeps running in the
    /// background and, unless it has already settled, a `Failed` state is
    /// published in the meantime.
    ///
    /// # Errors
    ///
    /// - `SyncError::TimedOut` if the cycle did not finish in time
    /// - `SyncError::FetchFailed` if the remote list could not be fetched
    /// - `SyncError::CleanupFailed` if the storage transaction failed
    #[instrument(skip(self))]
    pub async fn sync_blocking(&self, timeout: Duration) -> SyncOutcome {
        let cycle = self.inner.join_or_start(SyncTrigger::Startup).await;

        match tokio::time::timeout(timeout, cycle).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = SyncError::TimedOut(timeout);
                warn!(
                    "Startup sync did not finish within {:?}; continuing with last snapshot",
                    timeout
                );
                // The cycle may have finished between the deadline and here.
                self.inner.progress.publish_if_running(SyncState::Failed {
                    at: self.inner.clock.now(),
                    reason: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Manual refresh. Joins the in-flight cycle if there is one.
    #[instrument(skip(self))]
    pub async fn sync_now(&self) -> SyncOutcome {
        self.inner.join_or_start(SyncTrigger::Manual).await.await
    }

    /// Start the recurring background sync.
    ///
    /// The first tick fires one `interval` from now. Starting a new loop stops
    /// the previous one.
    pub fn start_background_loop(&self, interval: Duration) -> BackgroundSyncHandle {
        let token = CancellationToken::new();

        let previous = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            info!("Replacing existing background sync loop");
            previous.cancel();
        }

        let inner = self.inner.clone();
        let loop_token = token.clone();
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_secs = interval.as_secs(), "Background sync loop started");

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let cycle = inner.join_or_start(SyncTrigger::Background).await;
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    outcome = cycle => {
                        if let Err(e) = outcome {
                            debug!("Background sync cycle failed: {}", e);
                        }
                    }
                }
            }

            info!("Background sync loop stopped");
        });

        BackgroundSyncHandle { token, task }
    }

    /// Stop the background loop, if one is running.
    ///
    /// Returns `true` if a loop was stopped.
    pub fn stop_background_loop(&self) -> bool {
        let current = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match current {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop the background loop and wait for an in-flight cycle to finish.
    pub async fn shutdown(&self) {
        self.stop_background_loop();

        let in_flight = self
            .inner
            .in_flight
            .lock()
            .await
            .as_ref()
            .map(|flight| flight.outcome.clone());

        if let Some(outcome) = in_flight {
            debug!("Waiting for in-flight sync cycle before shutdown");
            let _ = outcome.await;
        }

        info!("Sync coordinator shut down");
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.stop_background_loop();
    }
}

impl CoordinatorInner {
    /// Return the in-flight cycle, starting one if none is running.
    async fn join_or_start(self: &Arc<Self>, trigger: SyncTrigger) -> SharedCycle {
        let mut slot = self.in_flight.lock().await;

        if let Some(flight) = slot.as_ref() {
            debug!(
                cycle_id = %flight.cycle_id,
                trigger = trigger.as_str(),
                "Joining in-flight sync cycle"
            );
            return flight.outcome.clone();
        }

        let cycle_id = CycleId::new();
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(inner.run_cycle(cycle_id, trigger))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(payload) => inner.abort_cycle(cycle_id, panic_payload_to_string(payload)),
            };

            let mut slot = inner.in_flight.lock().await;
            if slot.as_ref().map(|f| f.cycle_id) == Some(cycle_id) {
                *slot = None;
            }
            outcome
        });

        let outcome = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Sync cycle task failed: {}", e);
                    Err(SyncError::Aborted(e.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            cycle_id,
            outcome: outcome.clone(),
        });
        outcome
    }

    #[instrument(skip(self), fields(cycle_id = %cycle_id, trigger = trigger.as_str()))]
    async fn run_cycle(&self, cycle_id: CycleId, trigger: SyncTrigger) -> SyncOutcome {
        let timer = Instant::now();
        let started_at = self.clock.now();

        info!("Starting whitelist sync");
        self.progress.publish(SyncState::Running {
            phase: SyncPhase::Fetching,
            started_at,
        });
        self.emit(WhitelistEvent::SyncStarted {
            cycle_id: cycle_id.to_string(),
            trigger: trigger.to_string(),
        });

        let outcome = self.execute_cycle(cycle_id, started_at).await;
        let duration_ms = timer.elapsed().as_millis() as u64;

        match &outcome {
            Ok(report) => {
                info!(
                    hash = %report.content_hash,
                    added = report.added,
                    removed = report.removed,
                    unchanged = report.unchanged,
                    duration_ms,
                    "Whitelist sync succeeded"
                );
                self.progress.publish(SyncState::Succeeded {
                    at: self.clock.now(),
                    changed_count: report.changed_count(),
                });

                if report.unchanged {
                    self.emit(WhitelistEvent::SyncUnchanged {
                        cycle_id: cycle_id.to_string(),
                        content_hash: report.content_hash.clone(),
                    });
                } else {
                    self.emit(WhitelistEvent::SyncCompleted {
                        cycle_id: cycle_id.to_string(),
                        content_hash: report.content_hash.clone(),
                        added: report.added as u64,
                        removed: report.removed as u64,
                        duration_ms,
                    });
                }
            }
            Err(e) => {
                warn!(duration_ms, "Whitelist sync failed: {}", e);
                self.progress.publish(SyncState::Failed {
                    at: self.clock.now(),
                    reason: e.to_string(),
                });
                self.emit(WhitelistEvent::SyncFailed {
                    cycle_id: cycle_id.to_string(),
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                });
            }
        }

        outcome
    }

    /// Settle a cycle that panicked so later triggers start a fresh one.
    fn abort_cycle(&self, cycle_id: CycleId, message: String) -> SyncOutcome {
        let error = SyncError::Aborted(message);
        error!(cycle_id = %cycle_id, "Whitelist sync cycle panicked: {}", error);

        self.progress.publish(SyncState::Failed {
            at: self.clock.now(),
            reason: error.to_string(),
        });
        self.emit(WhitelistEvent::SyncFailed {
            cycle_id: cycle_id.to_string(),
            message: error.to_string(),
            recoverable: error.is_recoverable(),
        });
        Err(error)
    }

    async fn execute_cycle(
        &self,
        cycle_id: CycleId,
        started_at: DateTime<Utc>,
    ) -> Result<SyncReport> {
        let payload = self.fetch_with_retry().await?;
        let previous = self.store.get_snapshot().await?;

        if previous
            .as_ref()
            .is_some_and(|p| p.content_hash == payload.content_hash)
        {
            debug!(hash = %payload.content_hash, "Remote whitelist unchanged");
            return Ok(SyncReport {
                cycle_id,
                content_hash: payload.content_hash,
                added: 0,
                removed: 0,
                unchanged: true,
                cleanup: CleanupReport::default(),
            });
        }

        self.progress.publish(SyncState::Running {
            phase: SyncPhase::Diffing,
            started_at,
        });
        let changes = diff(previous.as_ref(), &payload);
        debug!(
            added = changes.added.len(),
            removed = changes.removed.len(),
            "Whitelist diff computed"
        );

        let snapshot = payload.to_snapshot(self.clock.now());

        let cleanup = if changes.removed.is_empty() {
            self.store.commit_snapshot(&snapshot).await?;
            CleanupReport::default()
        } else {
            self.progress.publish(SyncState::Running {
                phase: SyncPhase::Cleaning,
                started_at,
            });

            let plan = self
                .cleanup
                .plan(&changes.removed, &payload.artist_ids())
                .await?;
            let report = self.cleanup.apply_and_commit(&plan, &snapshot).await?;

            if report.entities_deleted() > 0 {
                self.emit_library(LibraryEvent::ContentPurged {
                    artist_ids: changes.removed.iter().cloned().collect(),
                    songs: report.songs_deleted,
                    albums: report.albums_deleted,
                    playlists: report.playlists_deleted,
                    artists: report.artists_deleted,
                });
            }
            report
        };

        Ok(SyncReport {
            cycle_id,
            content_hash: snapshot.content_hash,
            added: changes.added.len(),
            removed: changes.removed.len(),
            unchanged: false,
            cleanup,
        })
    }

    async fn fetch_with_retry(&self) -> FetchResult<RemotePayload> {
        let policy = self.config.retry_policy;
        let mut attempt = 1;

        loop {
            match self.fetcher.fetch().await {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Whitelist fetch failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn emit(&self, event: WhitelistEvent) {
        self.event_bus.emit(CoreEvent::Whitelist(event)).ok();
    }

    fn emit_library(&self, event: LibraryEvent) {
        self.event_bus.emit(CoreEvent::Library(event)).ok();
    }
}

fn panic_payload_to_string(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
