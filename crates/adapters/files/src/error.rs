//! Filesystem adapter error type.

use std::path::PathBuf;

use hubwatch_domain::error::HubError;

/// Errors originating from the files adapter.
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    /// Reading, writing or renaming a file failed.
    #[error("i/o error on {path}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A stored document is not valid JSON for its type.
    #[error("invalid JSON in {path}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl FileStoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

impl From<FileStoreError> for HubError {
    fn from(err: FileStoreError) -> Self {
        Self::Storage(Box::new(err))
    }
}
