//! Shared application state for axum handlers.

use std::sync::Arc;

use homesim_app::ports::{DocumentStore, WebhookNotifier};
use homesim_app::services::{ActionManager, RegistryService};
use homesim_app::simulator::Simulator;

/// Application state shared across all axum handlers.
///
/// Generic over the document store and the webhook notifier to avoid dynamic
/// dispatch. `Clone` is implemented manually so the underlying types
/// themselves do not need to be `Clone`; only the `Arc` wrappers are cloned.
pub struct AppState<S, N> {
    /// Devices, API keys and pairings.
    pub registry: Arc<RegistryService<S, N>>,
    /// Timed device actions.
    pub actions: Arc<ActionManager<S, N>>,
    /// Sensor timers, told about devices created or deleted over HTTP.
    pub simulator: Arc<Simulator<S, N>>,
}

impl<S, N> Clone for AppState<S, N> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            actions: Arc::clone(&self.actions),
            simulator: Arc::clone(&self.simulator),
        }
    }
}

impl<S, N> AppState<S, N>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    /// Wire the action manager and the simulator around a shared registry.
    pub fn new(registry: Arc<RegistryService<S, N>>, simulator: Simulator<S, N>) -> Self {
        Self {
            actions: Arc::new(ActionManager::new(Arc::clone(&registry))),
            simulator: Arc::new(simulator),
            registry,
        }
    }

    /// Create the state from pre-wrapped `Arc` services.
    ///
    /// Use this when the services are also owned by background tasks or by
    /// the shutdown sequence.
    pub fn from_arcs(
        registry: Arc<RegistryService<S, N>>,
        actions: Arc<ActionManager<S, N>>,
        simulator: Arc<Simulator<S, N>>,
    ) -> Self {
        Self {
            registry,
            actions,
            simulator,
        }
    }
}
