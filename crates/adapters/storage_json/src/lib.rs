//! # homesim-adapter-storage-json
//!
//! File-backed implementation of the `DocumentStore` port.
//!
//! ## Responsibilities
//! - Keep one JSON tree per file in memory, behind an async mutex
//! - Rewrite the whole file (pretty-printed, write-to-temp then rename) on
//!   every mutation
//! - Share one handle per file within the process ([`DocumentStoreCache`])
//!
//! ## Dependency rule
//! Depends on `homesim-app` (for the port trait) and `homesim-domain` (for
//! the error type). The `app` and `domain` crates must never reference this
//! adapter.

mod cache;
mod error;
mod store;

pub use cache::DocumentStoreCache;
pub use error::StorageError;
pub use store::JsonDocumentStore;
