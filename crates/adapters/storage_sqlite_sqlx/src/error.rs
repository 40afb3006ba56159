//! Storage-specific error type wrapping sqlx errors.

use hubwatch_domain::error::{ConflictError, HubError};

/// Errors originating from the `SQLite` storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A query or connection failed.
    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize or deserialize a stored JSON column.
    #[error("JSON column error")]
    Json(#[from] serde_json::Error),

    /// Failed to run migrations.
    #[error("migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StorageError {
    /// Classify a failed `INSERT` of `entity` keyed by `id`.
    ///
    /// A unique violation means another writer created the row first and
    /// surfaces as [`HubError::Conflict`] so callers can re-read and retry;
    /// anything else is a plain storage failure.
    pub(crate) fn on_insert(err: sqlx::Error, entity: &'static str, id: &str) -> HubError {
        match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => ConflictError {
                entity,
                id: id.to_string(),
            }
            .into(),
            other => Self::from(other).into(),
        }
    }
}

impl From<StorageError> for HubError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}
