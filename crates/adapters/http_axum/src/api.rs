//! JSON REST API handler modules.
//!
//! `/api/admin` is unauthenticated and sees everything. `/api/v1` requires an
//! active key in `X-API-Key` and only sees the devices paired with it.

pub mod actions;
#[allow(clippy::missing_errors_doc)]
pub mod api_keys;
#[allow(clippy::missing_errors_doc)]
pub mod auth;
#[allow(clippy::missing_errors_doc)]
pub mod devices;
#[allow(clippy::missing_errors_doc)]
pub mod integrations;

use std::str::FromStr;

use axum::Router;
use axum::middleware;
use axum::routing::{get, patch, post, put};
use serde_json::{Map, Value};

use homesim_app::ports::{DocumentStore, WebhookNotifier};
use homesim_domain::error::ValidationError;
use homesim_domain::id::{ApiKeyToken, DeviceId};

use crate::error::ApiError;
use crate::state::AppState;

/// Build the `/api/admin` sub-router.
pub fn admin_routes<S, N>() -> Router<AppState<S, N>>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    Router::new()
        // Devices
        .route(
            "/devices",
            get(devices::list::<S, N>).post(devices::create::<S, N>),
        )
        .route(
            "/devices/{id}",
            get(devices::get::<S, N>).delete(devices::delete::<S, N>),
        )
        .route("/devices/{id}/state", patch(devices::update_state::<S, N>))
        .route(
            "/devices/{id}/pairings/{key}",
            put(devices::pair::<S, N>).delete(devices::unpair::<S, N>),
        )
        // API keys
        .route(
            "/apikeys",
            get(api_keys::list::<S, N>).post(api_keys::create::<S, N>),
        )
        .route(
            "/apikeys/{key}",
            get(api_keys::get::<S, N>)
                .patch(api_keys::update::<S, N>)
                .delete(api_keys::delete::<S, N>),
        )
        // Actions
        .route("/actions", get(actions::list_running::<S, N>))
}

/// Build the `/api/v1` sub-router, every route behind the API-key check.
pub fn v1_routes<S, N>(state: AppState<S, N>) -> Router<AppState<S, N>>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    Router::new()
        .route("/devices", get(integrations::list::<S, N>))
        .route("/devices/{id}", get(integrations::get::<S, N>))
        .route(
            "/devices/{id}/state",
            patch(integrations::update_state::<S, N>),
        )
        .route(
            "/devices/{id}/actions/{action}",
            post(integrations::start_action::<S, N>)
                .delete(integrations::cancel_action::<S, N>),
        )
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_key::<S, N>,
        ))
}

/// Parse a device id from a path segment. A malformed id names no device.
pub(crate) fn parse_device_id(raw: &str) -> Result<DeviceId, ApiError> {
    DeviceId::from_str(raw).map_err(|_| ApiError::device_not_found(raw))
}

/// Parse an API-key token from a path segment. A malformed token names no key.
pub(crate) fn parse_api_key_token(raw: &str) -> Result<ApiKeyToken, ApiError> {
    ApiKeyToken::from_str(raw).map_err(|_| ApiError::api_key_not_found())
}

/// Require a request body to be a JSON object.
pub(crate) fn into_object(body: Value) -> Result<Map<String, Value>, ApiError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(ValidationError::NotAnObject.into()),
    }
}
