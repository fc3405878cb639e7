//! `X-API-Key` authentication for the third-party API.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use homesim_app::ports::{DocumentStore, WebhookNotifier};
use homesim_domain::api_key::ApiKey;
use homesim_domain::id::ApiKeyToken;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// The authenticated key, stored in the request extensions.
#[derive(Debug, Clone)]
pub struct Caller(pub ApiKey);

/// Let the request through only with a well-formed, existing, active key,
/// stamping its `lastUsed`.
pub async fn require_api_key<S, N>(
    State(state): State<AppState<S, N>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let Some(token) = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<ApiKeyToken>().ok())
    else {
        return Err(ApiError::Unauthorized);
    };

    match state.registry.get_api_key(&token).await? {
        Some(api_key) if api_key.is_active => {}
        Some(_) => {
            tracing::debug!(api_key = ?token, "rejected inactive api key");
            return Err(ApiError::Unauthorized);
        }
        None => return Err(ApiError::Unauthorized),
    }
    // Re-checked on the stamped copy: the key may have been revoked meanwhile.
    let api_key = state
        .registry
        .record_api_key_use(&token)
        .await?
        .filter(|api_key| api_key.is_active)
        .ok_or(ApiError::Unauthorized)?;

    request.extensions_mut().insert(Caller(api_key));
    Ok(next.run(request).await)
}
