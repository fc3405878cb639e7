//! Admin JSON handlers for devices and their pairings.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use homesim_app::ports::{DocumentStore, WebhookNotifier};
use homesim_app::services::Pairing;
use homesim_domain::capability::ControlSurface;
use homesim_domain::device::{DeviceWithCapabilities, NewDevice};

use crate::api::{into_object, parse_api_key_token, parse_device_id};
use crate::error::ApiError;
use crate::state::AppState;

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(Json<Vec<DeviceWithCapabilities>>),
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
    Ok(Json<DeviceWithCapabilities>),
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
    Created(Json<DeviceWithCapabilities>),
}

impl IntoResponse for CreateResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Created(json) => (StatusCode::CREATED, json).into_response(),
        }
    }
}

/// Possible responses from the delete and pairing endpoints.
pub enum NoContentResponse {
    NoContent,
}

impl IntoResponse for NoContentResponse {
    fn into_response(self) -> Response {
        match self {
            Self::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

/// `GET /api/admin/devices`
pub async fn list<S, N>(State(state): State<AppState<S, N>>) -> Result<ListResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let devices = state.registry.get_devices_with_capabilities().await?;
    Ok(ListResponse::Ok(Json(devices)))
}

/// `POST /api/admin/devices`
///
/// The body carries `type`, `name` and optionally `connected` plus any
/// type-specific field; omitted fields take the type's initial state.
pub async fn create<S, N>(
    State(state): State<AppState<S, N>>,
    Json(body): Json<Value>,
) -> Result<CreateResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let new_device = NewDevice::from_payload(into_object(body)?)?;
    let device = state.registry.create_device(new_device).await?;
    state.simulator.track_device(&device);
    Ok(CreateResponse::Created(Json(device.with_capabilities())))
}

/// `GET /api/admin/devices/{id}`
pub async fn get<S, N>(
    State(state): State<AppState<S, N>>,
    Path(id): Path<String>,
) -> Result<GetResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let device_id = parse_device_id(&id)?;
    let device = state
        .registry
        .get_device_with_capabilities(device_id)
        .await?
        .ok_or_else(|| ApiError::device_not_found(device_id))?;
    Ok(GetResponse::Ok(Json(device)))
}

/// `DELETE /api/admin/devices/{id}`
pub async fn delete<S, N>(
    State(state): State<AppState<S, N>>,
    Path(id): Path<String>,
) -> Result<NoContentResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let device_id = parse_device_id(&id)?;
    state.simulator.untrack_device(device_id);
    if !state.registry.delete_device(device_id).await? {
        return Err(ApiError::device_not_found(device_id));
    }
    Ok(NoContentResponse::NoContent)
}

/// `PATCH /api/admin/devices/{id}/state`
///
/// Besides the type's writable fields, the admin surface may rename a device
/// and flip `connected`.
pub async fn update_state<S, N>(
    State(state): State<AppState<S, N>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<GetResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let device_id = parse_device_id(&id)?;
    let partial = into_object(body)?;
    let device = state
        .registry
        .get_device(device_id)
        .await?
        .ok_or_else(|| ApiError::device_not_found(device_id))?;
    device
        .device_type()
        .check_update(&partial, ControlSurface::Admin)?;

    let updated = state
        .registry
        .update_device_state(device_id, partial)
        .await?
        .ok_or_else(|| ApiError::device_not_found(device_id))?;
    Ok(GetResponse::Ok(Json(updated.with_capabilities())))
}

/// `PUT /api/admin/devices/{id}/pairings/{key}`
pub async fn pair<S, N>(
    State(state): State<AppState<S, N>>,
    Path((id, key)): Path<(String, String)>,
) -> Result<NoContentResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let device_id = parse_device_id(&id)?;
    let key = parse_api_key_token(&key)?;
    match state
        .registry
        .pair_device_with_api_key(device_id, &key)
        .await?
    {
        Pairing::Paired => Ok(NoContentResponse::NoContent),
        Pairing::UnknownDevice => Err(ApiError::device_not_found(device_id)),
        Pairing::UnknownApiKey => Err(ApiError::api_key_not_found()),
    }
}

/// `DELETE /api/admin/devices/{id}/pairings/{key}`
pub async fn unpair<S, N>(
    State(state): State<AppState<S, N>>,
    Path((id, key)): Path<(String, String)>,
) -> Result<NoContentResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let device_id = parse_device_id(&id)?;
    if !state
        .registry
        .unpair_device_from_api_key(device_id, &parse_api_key_token(&key)?)
        .await?
    {
        return Err(ApiError::device_not_found(device_id));
    }
    Ok(NoContentResponse::NoContent)
}
