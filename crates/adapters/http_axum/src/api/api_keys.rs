//! Admin JSON handlers for API keys.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::Value;

use homesim_app::ports::{DocumentStore, WebhookNotifier};
use homesim_domain::api_key::ApiKey;

use crate::api::{into_object, parse_api_key_token};
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for issuing a key.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(Json<Vec<ApiKey>>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the get and update endpoints.
pub enum GetResponse {
    Ok(Json<ApiKey>),
}

impl IntoResponse for GetResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the create endpoint.
pub enum CreateResponse {
    Created(Json<ApiKey>),
}

impl IntoResponse for CreateResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Created(json) => (StatusCode::CREATED, json).into_response(),
        }
    }
}

/// Possible responses from the delete endpoint.
pub enum DeleteResponse {
    NoContent,
}

impl IntoResponse for DeleteResponse {
    fn into_response(self) -> Response {
        match self {
            Self::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

/// `GET /api/admin/apikeys`
pub async fn list<S, N>(State(state): State<AppState<S, N>>) -> Result<ListResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let api_keys = state.registry.get_api_keys().await?;
    Ok(ListResponse::Ok(Json(api_keys)))
}

/// `POST /api/admin/apikeys`
pub async fn create<S, N>(
    State(state): State<AppState<S, N>>,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<CreateResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let api_key = state
        .registry
        .create_api_key(&req.name, req.webhook_url)
        .await?;
    Ok(CreateResponse::Created(Json(api_key)))
}

/// `GET /api/admin/apikeys/{key}`
pub async fn get<S, N>(
    State(state): State<AppState<S, N>>,
    Path(key): Path<String>,
) -> Result<GetResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let api_key = state
        .registry
        .get_api_key(&parse_api_key_token(&key)?)
        .await?
        .ok_or_else(ApiError::api_key_not_found)?;
    Ok(GetResponse::Ok(Json(api_key)))
}

/// `PATCH /api/admin/apikeys/{key}`
///
/// Merges `name`, `isActive` or `webhookUrl`; the token itself never changes.
pub async fn update<S, N>(
    State(state): State<AppState<S, N>>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Result<GetResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let partial = into_object(body)?;
    let api_key = state
        .registry
        .update_api_key(&parse_api_key_token(&key)?, partial)
        .await?
        .ok_or_else(ApiError::api_key_not_found)?;
    Ok(GetResponse::Ok(Json(api_key)))
}

/// `DELETE /api/admin/apikeys/{key}`
///
/// Also unpairs the key from every device.
pub async fn delete<S, N>(
    State(state): State<AppState<S, N>>,
    Path(key): Path<String>,
) -> Result<DeleteResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    if !state
        .registry
        .delete_api_key(&parse_api_key_token(&key)?)
        .await?
    {
        return Err(ApiError::api_key_not_found());
    }
    Ok(DeleteResponse::NoContent)
}
