//! Axum router assembly.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use homesim_app::ports::{DocumentStore, WebhookNotifier};

use crate::state::AppState;

/// Build the top-level axum [`Router`].
///
/// Nests the admin API under `/api/admin` and the third-party API under
/// `/api/v1`. Includes a [`TraceLayer`] that logs each HTTP request/response
/// at the `DEBUG` level using the `tracing` ecosystem.
pub fn build<S, N>(state: AppState<S, N>) -> Router
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/admin", crate::api::admin_routes())
        .nest("/api/v1", crate::api::v1_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
