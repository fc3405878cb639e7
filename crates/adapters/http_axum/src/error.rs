//! HTTP error response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use homesim_domain::error::{HomeSimError, NotFoundError, ValidationError};

/// JSON error body returned by API endpoints.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Everything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    /// An application error, mapped by kind.
    Domain(HomeSimError),
    /// Missing, unknown or inactive `X-API-Key`.
    Unauthorized,
}

impl ApiError {
    /// 404 for a device that does not exist or is not visible to the caller.
    pub fn device_not_found(id: impl ToString) -> Self {
        Self::Domain(
            NotFoundError {
                entity: "Device",
                id: id.to_string(),
            }
            .into(),
        )
    }

    /// 404 for an unknown API key.
    pub fn api_key_not_found() -> Self {
        Self::Domain(
            NotFoundError {
                entity: "ApiKey",
                id: "<redacted>".to_string(),
            }
            .into(),
        )
    }
}

impl From<HomeSimError> for ApiError {
    fn from(err: HomeSimError) -> Self {
        Self::Domain(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Domain(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "missing or invalid api key".to_string(),
            ),
            Self::Domain(HomeSimError::Validation(err)) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            Self::Domain(HomeSimError::NotFound(err)) => (StatusCode::NOT_FOUND, err.to_string()),
            Self::Domain(HomeSimError::Transition(err)) => (StatusCode::CONFLICT, err.to_string()),
            Self::Domain(err @ (HomeSimError::Integrity(_) | HomeSimError::Storage(_))) => {
                tracing::error!(error = ?err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}
