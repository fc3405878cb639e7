//! Application services — use-case implementations.
//!
//! Each service struct accepts port trait implementations via generic parameters
//! (constructor injection), keeping this layer decoupled from concrete adapters.

pub mod action_manager;
pub mod registry_service;

pub use action_manager::{ActionHooks, ActionManager, HookError};
pub use registry_service::{Pairing, RegistryService};
