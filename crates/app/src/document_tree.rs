//! Path-addressed JSON tree and an in-memory [`DocumentStore`] built on it.
//!
//! The tree is shared by every store implementation so that path semantics
//! are identical whether documents live in memory or in a file.

use std::future::Future;

use homesim_domain::error::HomeSimError;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::ports::DocumentStore;

/// Split a path into its non-empty segments.
fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// A JSON object tree navigated by `/`-separated paths.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTree {
    root: Value,
}

impl Default for DocumentTree {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl DocumentTree {
    /// Empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing document; `None` when `root` is not an object.
    #[must_use]
    pub fn from_value(root: Value) -> Option<Self> {
        root.is_object().then_some(Self { root })
    }

    /// The whole tree.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Value at `path`; the root path (`/`) yields the whole tree.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        segments(path)
            .into_iter()
            .try_fold(&self.root, |node, segment| node.get(segment))
    }

    /// Replace the value at `path`.
    ///
    /// Missing intermediate nodes are created as objects, and a scalar in
    /// the way is replaced by an object. Putting a non-object at the root is
    /// ignored so the tree always stays an object.
    pub fn put(&mut self, path: &str, value: Value) {
        let segments = segments(path);
        if segments.is_empty() && !value.is_object() {
            return;
        }
        put_at(&mut self.root, &segments, value);
    }

    /// Remove the value at `path`. The root itself cannot be removed.
    pub fn delete(&mut self, path: &str) -> bool {
        remove_at(&mut self.root, &segments(path))
    }
}

fn put_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry((*head).to_string()).or_insert(Value::Null);
        put_at(child, rest, value);
    }
}

fn remove_at(node: &mut Value, segments: &[&str]) -> bool {
    match segments {
        [] => false,
        [last] => node
            .as_object_mut()
            .is_some_and(|map| map.remove(*last).is_some()),
        [head, rest @ ..] => node
            .get_mut(*head)
            .is_some_and(|child| remove_at(child, rest)),
    }
}

/// Process-local [`DocumentStore`]; contents are lost on drop.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    tree: RwLock<DocumentTree>,
}

impl InMemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<Value>, HomeSimError>> + Send {
        async move { Ok(self.tree.read().await.get(path).cloned()) }
    }

    fn put(&self, path: &str, value: Value) -> impl Future<Output = Result<(), HomeSimError>> + Send {
        async move {
            self.tree.write().await.put(path, value);
            Ok(())
        }
    }

    fn delete(&self, path: &str) -> impl Future<Output = Result<bool, HomeSimError>> + Send {
        async move { Ok(self.tree.write().await.delete(path)) }
    }
}
