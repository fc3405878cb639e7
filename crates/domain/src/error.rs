//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`HomeSimError`]
//! via `#[from]`. Business-level absence (unknown device, unknown key) is not an
//! error: services return `Option`/`bool` for it so callers can tell "not
//! found" apart from "system broken".

/// Top-level error shared by every layer.
#[derive(Debug, thiserror::Error)]
pub enum HomeSimError {
    /// A payload or entity failed its type-specific schema.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// An entity required by the operation does not exist.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// Persisted data could not be interpreted.
    #[error("data integrity error")]
    Integrity(#[from] IntegrityError),

    /// An action was asked to leave a state it cannot leave.
    #[error("invalid action transition")]
    Transition(#[from] crate::action::TransitionError),

    /// The persistence layer failed.
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Schema or invariant violation on a payload.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("{0} is read-only")]
    ReadOnlyField(String),

    #[error("{0} cannot be changed")]
    ImmutableField(String),

    #[error("unknown field {0}")]
    UnknownField(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("unknown device type {0:?}")]
    UnknownDeviceType(String),

    #[error("invalid webhook url {0:?}")]
    InvalidWebhookUrl(String),

    #[error("action {action:?} is not supported by {device_type} devices")]
    UnsupportedAction {
        device_type: &'static str,
        action: String,
    },

    #[error("invalid action name {0:?}")]
    InvalidActionName(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("payload must be a JSON object")]
    NotAnObject,
}

/// A referenced entity is missing.
#[derive(Debug, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Stored data does not match any known schema.
///
/// This is fatal for the affected record: it is never coerced into a default.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("document at {path} has unknown device type {type_tag:?}")]
    UnknownDeviceType { path: String, type_tag: String },

    #[error("document at {path} is not a collection")]
    NotACollection { path: String },

    #[error("document at {path} is malformed")]
    MalformedDocument {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
