//! Third-party JSON handlers, scoped to the caller's paired devices.
//!
//! A device that exists but is not paired with the caller is reported as
//! missing, so keys cannot discover device ids.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;
use serde_json::Value;

use homesim_app::ports::{DocumentStore, WebhookNotifier};
use homesim_domain::action::Action;
use homesim_domain::capability::ControlSurface;
use homesim_domain::device::{Device, DeviceWithCapabilities};
use homesim_domain::error::NotFoundError;
use homesim_domain::id::{ActionId, DeviceId};

use crate::api::auth::Caller;
use crate::api::{into_object, parse_device_id};
use crate::error::ApiError;
use crate::state::AppState;

/// Body of an accepted action.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedAction {
    pub action_id: ActionId,
    #[serde(flatten)]
    pub action: Action,
}

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

/// Possible responses from the start-action endpoint.
pub enum StartResponse {
    Accepted(Json<StartedAction>),
}

impl IntoResponse for StartResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Accepted(json) => (StatusCode::ACCEPTED, json).into_response(),
        }
    }
}

/// Possible responses from the cancel-action endpoint.
pub enum CancelResponse {
    NoContent,
}

impl IntoResponse for CancelResponse {
    fn into_response(self) -> Response {
        match self {
            Self::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

async fn paired_device<S, N>(
    state: &AppState<S, N>,
    caller: &Caller,
    id: &str,
) -> Result<Device, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let device_id: DeviceId = parse_device_id(id)?;
    state
        .registry
        .get_device(device_id)
        .await?
        .filter(|device| device.is_paired_with(&caller.0.key))
        .ok_or_else(|| ApiError::device_not_found(device_id))
}

/// `GET /api/v1/devices`
pub async fn list<S, N>(
    State(state): State<AppState<S, N>>,
    Extension(caller): Extension<Caller>,
) -> Result<ListResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let devices = state
        .registry
        .get_devices_for_api_key(&caller.0.key)
        .await?
        .into_iter()
        .map(Device::with_capabilities)
        .collect();
    Ok(ListResponse::Ok(Json(devices)))
}

/// `GET /api/v1/devices/{id}`
pub async fn get<S, N>(
    State(state): State<AppState<S, N>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<GetResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let device = paired_device(&state, &caller, &id).await?;
    Ok(GetResponse::Ok(Json(device.with_capabilities())))
}

/// `PATCH /api/v1/devices/{id}/state`
///
/// Only the type's writable controls are accepted.
pub async fn update_state<S, N>(
    State(state): State<AppState<S, N>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<GetResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let partial = into_object(body)?;
    let device = paired_device(&state, &caller, &id).await?;
    device
        .device_type()
        .check_update(&partial, ControlSurface::ThirdParty)?;

    let updated = state
        .registry
        .update_device_state(device.id, partial)
        .await?
        .ok_or_else(|| ApiError::device_not_found(device.id))?;
    Ok(GetResponse::Ok(Json(updated.with_capabilities())))
}

/// `POST /api/v1/devices/{id}/actions/{name}`
pub async fn start_action<S, N>(
    State(state): State<AppState<S, N>>,
    Extension(caller): Extension<Caller>,
    Path((id, name)): Path<(String, String)>,
) -> Result<StartResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let device = paired_device(&state, &caller, &id).await?;
    let (action_id, action) = state.actions.start_device_action(device.id, &name).await?;
    Ok(StartResponse::Accepted(Json(StartedAction {
        action_id,
        action,
    })))
}

/// `DELETE /api/v1/devices/{id}/actions/{action_id}`
pub async fn cancel_action<S, N>(
    State(state): State<AppState<S, N>>,
    Extension(caller): Extension<Caller>,
    Path((id, action_id)): Path<(String, String)>,
) -> Result<CancelResponse, ApiError>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    let device = paired_device(&state, &caller, &id).await?;
    let action_id = ActionId::from(action_id);
    if !state.actions.cancel_action(device.id, &action_id).await? {
        return Err(ApiError::Domain(
            NotFoundError {
                entity: "Action",
                id: action_id.to_string(),
            }
            .into(),
        ));
    }
    Ok(CancelResponse::NoContent)
}
