//! Admin view of the action timers.

use axum::Json;
use axum::extract::State;

use homesim_app::ports::{DocumentStore, WebhookNotifier};
use homesim_domain::id::ActionId;

use crate::state::AppState;

/// `GET /api/admin/actions`: ids of the actions whose timer is still armed.
pub async fn list_running<S, N>(
    State(state): State<AppState<S, N>>,
) -> Json<Vec<ActionId>>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    Json(state.actions.get_running_actions())
}
