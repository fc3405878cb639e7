//! Storage-specific error type wrapping IO and JSON errors.

use std::path::PathBuf;

use homesim_domain::error::HomeSimError;

/// Errors originating from the JSON file storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading, writing or renaming the backing file failed.
    #[error("IO error")]
    Io(#[from] std::io::Error),

    /// The backing file is not valid JSON, or the tree failed to serialize.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// The backing file holds JSON whose root is not an object.
    #[error("document root of {} is not an object", path.display())]
    NotAnObject { path: PathBuf },
}

impl From<StorageError> for HomeSimError {
    fn from(err: StorageError) -> Self {
        Self::Storage(Box::new(err))
    }
}
