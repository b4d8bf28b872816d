use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, LibraryError>;

/// Failures of the whitelist storage contract.
///
/// Cloneable so one failed cycle can be reported to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The transaction could not complete and was rolled back.
    #[error("Storage transaction failed: {0}")]
    TransactionFailed(String),

    /// A referential or uniqueness constraint rejected a write.
    #[error("Storage constraint violated: {0}")]
    Constraint(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        let is_constraint = error
            .as_database_error()
            .map(|db| !matches!(db.kind(), ErrorKind::Other))
            .unwrap_or(false);

        if is_constraint {
            StorageError::Constraint(error.to_string())
        } else {
            StorageError::TransactionFailed(error.to_string())
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
