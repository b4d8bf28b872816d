use core_library::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Failure to obtain the remote whitelist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Fetch timed out: {0}")]
    Timeout(String),

    #[error("Malformed whitelist document: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Network trouble and timeouts may clear up on their own; a malformed
    /// document will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Timeout(_))
    }
}

/// Failure of a sync cycle.
///
/// Cloneable so that callers coalesced onto one in-flight cycle all receive
/// the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Whitelist fetch failed: {0}")]
    FetchFailed(#[from] FetchError),

    #[error("Catalog cleanup failed: {0}")]
    CleanupFailed(#[from] StorageError),

    #[error("Sync did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("Sync task aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    /// Whether a later cycle can be expected to succeed without intervention.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::FetchFailed(e) => e.is_transient(),
            SyncError::CleanupFailed(_) => false,
            SyncError::TimedOut(_) | SyncError::Aborted(_) => true,
        }
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

pub type Result<T> = std::result::Result<T, SyncError>;
