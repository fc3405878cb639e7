//! # homesim-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Serve the **admin API** under `/api/admin`: devices, API keys, pairings
//!   and running actions
//! - Serve the **third-party API** under `/api/v1`, gated by the `X-API-Key`
//!   header and scoped to the devices paired with that key
//! - Reject writes to identity, read-only and unknown fields before they reach
//!   the registry
//! - Map application results into JSON responses and status codes
//!
//! ## Dependency rule
//! Depends on `homesim-app` (for port traits and services) and `homesim-domain`
//! (for domain types used in request/response mapping). Never leaks axum types
//! into the domain.

pub mod api;
pub mod error;
pub mod router;
pub mod state;
