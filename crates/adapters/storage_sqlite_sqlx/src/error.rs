//! Storage-specific error type wrapping sqlx errors.

use crmflow_domain::error::CrmFlowError;

/// Errors originating from the `SQLite` storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A query or connection failed.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize or deserialize a stored JSON value.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// Failed to run migrations.
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A counter does not fit the `INTEGER` column.
    #[error("integer out of range")]
    OutOfRange(#[from] std::num::TryFromIntError),
}

impl From<StorageError> for CrmFlowError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}
