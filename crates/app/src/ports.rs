//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod document_store;
pub mod webhook;

pub use document_store::DocumentStore;
pub use webhook::WebhookNotifier;
