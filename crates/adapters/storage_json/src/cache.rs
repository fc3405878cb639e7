//! Process-wide registry of open [`JsonDocumentStore`]s.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::store::JsonDocumentStore;

/// Hands out one shared store per backing file.
///
/// The first `open` of a path loads it from disk; later calls for the same
/// path get the same handle, so two services never hold diverging copies of
/// one file.
#[derive(Debug, Default)]
pub struct DocumentStoreCache {
    stores: Mutex<HashMap<PathBuf, Arc<JsonDocumentStore>>>,
}

impl DocumentStoreCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the store for `path`, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file has to be loaded and cannot be.
    /// A failed load is not cached.
    pub async fn open(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Arc<JsonDocumentStore>, StorageError> {
        let path = path.as_ref();
        let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(&key) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(JsonDocumentStore::open(path).await?);
        stores.insert(key, Arc::clone(&store));
        Ok(store)
    }

    /// Number of distinct files currently open.
    pub async fn len(&self) -> usize {
        self.stores.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
