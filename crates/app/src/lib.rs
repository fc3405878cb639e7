//! # homesim-app
//!
//! Application layer — use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `DocumentStore` — path-addressed JSON document persistence
//!   - `WebhookNotifier` — delivery of state deltas to subscribers
//! - Define **driving/inbound** use-cases:
//!   - `RegistryService` — devices, API keys, pairings, webhook fan-out
//!   - `ActionManager` — timed device actions and their lifecycle
//!   - `Simulator` — periodic sensor readings and the midnight reset
//! - Provide **in-process infrastructure** (in-memory document store) that
//!   doesn't need IO
//!
//! ## Dependency rule
//! Depends on `homesim-domain` only (plus `tokio` for tasks and locks).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod document_tree;
pub mod ports;
pub mod services;
pub mod simulator;
