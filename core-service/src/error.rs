use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Storage error: {0}")]
    Storage(#[from] core_library::StorageError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_whitelist::SyncError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
