//! # Whitelist Sync Module
//!
//! Keeps the local catalog aligned with a remotely published artist
//! whitelist.
//!
//! ## Overview
//!
//! A sync cycle fetches the published list, compares it with the last
//! applied snapshot and purges catalog content whose artists are no longer
//! whitelisted. Content co-credited to a still-whitelisted artist, and
//! content with no artist at all, is always retained.
//!
//! ## Components
//!
//! - **Fetcher** (`fetcher`): Retrieves and validates the remote document
//! - **Diff Engine** (`diff`): Hash short-circuit plus full set comparison
//! - **Cascade Cleanup Engine** (`cleanup`): Plans deletions and applies them in one transaction
//! - **Sync Coordinator** (`coordinator`): Single-flight cycle, startup/background/manual triggers, retry
//! - **Progress Publisher** (`progress`): Observable `SyncState` with replay-last subscriptions

pub mod cleanup;
pub mod coordinator;
pub mod diff;
pub mod error;
pub mod fetcher;
pub mod progress;

pub use cleanup::CascadeCleanupEngine;
pub use coordinator::{
    BackgroundSyncHandle, CycleId, SyncConfig, SyncCoordinator, SyncOutcome, SyncReport,
    SyncTrigger,
};
pub use core_runtime::config::FetchRetryPolicy;
pub use diff::{diff, DiffResult};
pub use error::{FetchError, FetchResult, Result, SyncError};
pub use fetcher::{HttpWhitelistFetcher, RemotePayload, WhitelistFetcher};
pub use progress::{ProgressPublisher, SyncPhase, SyncState, SyncStateStream};
