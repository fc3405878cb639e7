//! State deltas and the outbound webhook payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::DeviceType;
use crate::id::DeviceId;
use crate::time::Timestamp;

/// Subset of `new` whose values differ from `previous`.
///
/// Only keys present in `new` are considered. Values are compared as JSON, so
/// nested objects and arrays are compared deeply; a key missing from
/// `previous` counts as changed.
#[must_use]
pub fn changes(previous: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    new.iter()
        .filter(|(field, value)| previous.get(*field) != Some(*value))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

/// Body POSTed to a subscriber's webhook URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub device_id: DeviceId,
    pub device_type: DeviceType,
    pub timestamp: Timestamp,
    pub changes: Map<String, Value>,
}
