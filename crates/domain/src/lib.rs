//! # homesim-domain
//!
//! Pure domain model for the homesim smart-home simulator.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Devices** as a closed sum type over every supported device type
//! - Define the static **Capability** tables (control surface, read-only fields,
//!   built-in actions) per device type
//! - Define **API keys** and the **Action** lifecycle state machine
//! - Compute state **deltas** and the outbound webhook payload
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod action;
pub mod api_key;
pub mod capability;
pub mod delta;
pub mod device;
