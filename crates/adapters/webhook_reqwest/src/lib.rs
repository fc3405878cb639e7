//! # homesim-adapter-webhook-reqwest
//!
//! HTTP delivery of device state deltas using [reqwest](https://docs.rs/reqwest).
//!
//! ## Responsibilities
//! - Implement the `WebhookNotifier` port defined in `homesim-app`
//! - Build the JSON payload from the previous and new device state
//! - Authenticate the delivery with the subscriber's own key in `X-API-Key`
//!
//! ## Dependency rule
//! Depends on `homesim-app` (for the port trait) and `homesim-domain` (for
//! domain types). The `app` and `domain` crates must never reference this
//! adapter.

mod notifier;

pub use notifier::{API_KEY_HEADER, DEFAULT_TIMEOUT, ReqwestWebhookNotifier, WebhookError};
