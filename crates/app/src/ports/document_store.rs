//! Document store port — a single JSON tree addressed by `/`-separated paths.
//!
//! Paths look like `/devices/<id>` or `/devices/<id>/activeActions/<action>`.
//! Empty segments are ignored, so `/devices/` and `devices` name the same node.

use std::future::Future;

use homesim_domain::error::HomeSimError;
use serde_json::Value;

/// Hierarchical JSON persistence.
///
/// Absence is not an error: `get` yields `None` and `delete` yields `false`.
/// Only infrastructure failures surface as [`HomeSimError::Storage`].
pub trait DocumentStore: Send + Sync {
    /// Read the value at `path`, including whole subtrees.
    fn get(&self, path: &str)
    -> impl Future<Output = Result<Option<Value>, HomeSimError>> + Send;

    /// Replace the value at `path`, creating intermediate objects as needed.
    fn put(&self, path: &str, value: Value)
    -> impl Future<Output = Result<(), HomeSimError>> + Send;

    /// Remove the value at `path`. Returns whether something was removed.
    fn delete(&self, path: &str) -> impl Future<Output = Result<bool, HomeSimError>> + Send;
}

impl<T: DocumentStore> DocumentStore for std::sync::Arc<T> {
    fn get(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<Value>, HomeSimError>> + Send {
        (**self).get(path)
    }

    fn put(&self, path: &str, value: Value) -> impl Future<Output = Result<(), HomeSimError>> + Send {
        (**self).put(path, value)
    }

    fn delete(&self, path: &str) -> impl Future<Output = Result<bool, HomeSimError>> + Send {
        (**self).delete(path)
    }
}
