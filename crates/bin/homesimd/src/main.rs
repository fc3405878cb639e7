//! # homesimd — homesim daemon
//!
//! Composition root that wires all adapters together and starts the server.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialise `tracing` with the configured filter
//! - Open the JSON document store and the webhook client (adapters)
//! - Construct the registry, action manager and simulator, injecting the
//!   adapters via port traits
//! - Build the axum router, injecting application services
//! - Bind to a TCP port and serve
//! - Handle graceful shutdown (SIGTERM/SIGINT): stop accepting requests, then
//!   abort simulator and action timers
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use std::sync::Arc;

use homesim_adapter_http_axum::state::AppState;
use homesim_adapter_storage_json::DocumentStoreCache;
use homesim_adapter_webhook_reqwest::ReqwestWebhookNotifier;
use homesim_app::services::{ActionManager, RegistryService};
use homesim_app::simulator::Simulator;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    // Adapters
    let stores = DocumentStoreCache::new();
    let store = stores.open(&config.storage.path).await?;
    let notifier = ReqwestWebhookNotifier::new(config.webhook_timeout())?;

    // Services
    let registry = Arc::new(RegistryService::new(store, notifier));
    let actions = Arc::new(ActionManager::new(Arc::clone(&registry)));
    let simulator = Arc::new(Simulator::new(
        Arc::clone(&registry),
        config.simulator_interval(),
    ));
    simulator.start().await?;

    // HTTP
    let state = AppState::from_arcs(
        Arc::clone(&registry),
        Arc::clone(&actions),
        Arc::clone(&simulator),
    );
    let app = homesim_adapter_http_axum::router::build(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        storage = %config.storage.path.display(),
        "homesimd listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    simulator.shutdown();
    actions.shutdown();
    tracing::info!("homesimd stopped");
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
