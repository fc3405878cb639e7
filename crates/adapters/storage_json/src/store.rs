//! [`DocumentStore`] backed by a single pretty-printed JSON file.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};

use homesim_app::document_tree::DocumentTree;
use homesim_app::ports::DocumentStore;
use homesim_domain::error::HomeSimError;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::StorageError;

/// A JSON document tree mirrored to a file.
///
/// Reads are served from memory. Every mutation is applied to a copy of the
/// tree, written to disk, and only then made visible, so the in-memory tree
/// never runs ahead of the file.
#[derive(Debug)]
pub struct JsonDocumentStore {
    path: PathBuf,
    tree: Mutex<DocumentTree>,
}

impl JsonDocumentStore {
    /// Load the tree stored at `path`. A missing or empty file starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file cannot be read, is not JSON, or
    /// its root is not an object.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let tree = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => DocumentTree::new(),
            Ok(content) => {
                let root: Value = serde_json::from_str(&content)?;
                DocumentTree::from_value(root)
                    .ok_or_else(|| StorageError::NotAnObject { path: path.clone() })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "storage file not found, starting empty");
                DocumentTree::new()
            }
            Err(err) => return Err(err.into()),
        };
        tracing::info!(path = %path.display(), "document store opened");
        Ok(Self {
            path,
            tree: Mutex::new(tree),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| OsString::from("store"), OsString::from);
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write `tree` to a temp file next to the target, then rename it over.
    async fn persist(&self, tree: &DocumentTree) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(tree.as_value())?;
        let temp_path = self.temp_path();
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &self.path).await?;
        tracing::trace!(path = %self.path.display(), "document store saved");
        Ok(())
    }

    /// Apply `change` to a copy of the tree and, when it reports a change,
    /// persist the copy and swap it in.
    async fn mutate(
        &self,
        change: impl FnOnce(&mut DocumentTree) -> bool + Send,
    ) -> Result<bool, StorageError> {
        let mut tree = self.tree.lock().await;
        let mut next = tree.clone();
        if !change(&mut next) {
            return Ok(false);
        }
        self.persist(&next).await?;
        *tree = next;
        Ok(true)
    }
}

impl DocumentStore for JsonDocumentStore {
    fn get(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<Value>, HomeSimError>> + Send {
        async move { Ok(self.tree.lock().await.get(path).cloned()) }
    }

    fn put(&self, path: &str, value: Value) -> impl Future<Output = Result<(), HomeSimError>> + Send {
        async move {
            self.mutate(|tree| {
                tree.put(path, value);
                true
            })
            .await?;
            Ok(())
        }
    }

    fn delete(&self, path: &str) -> impl Future<Output = Result<bool, HomeSimError>> + Send {
        async move { Ok(self.mutate(|tree| tree.delete(path)).await?) }
    }
}
