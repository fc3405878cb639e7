//! Device — a simulated smart-home thing with a type-specific state.
//!
//! A [`Device`] is the common envelope (identity, pairing, in-flight actions)
//! around a [`DeviceState`], which is a closed sum type over every supported
//! device type. Documents are stored as one flat JSON object per device:
//!
//! ```json
//! {
//!   "id": "6f1c…",
//!   "name": "Kitchen thermometer",
//!   "connected": true,
//!   "pairedApiKeys": ["9be0…"],
//!   "activeActions": {},
//!   "type": "thermometer",
//!   "temperature": 21.4
//! }
//! ```

mod state;

pub use state::{ClimateMode, ColorTemperature, DeviceState, FanSpeed, LimitedColor};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::Action;
use crate::capability::{BuiltinAction, Capability, DeviceType};
use crate::error::{HomeSimError, IntegrityError, ValidationError};
use crate::id::{ActionId, ApiKeyToken, DeviceId};

/// Fields a creation payload may carry besides the type-specific ones.
const CREATION_HEADER_FIELDS: &[&str] = &["type", "name", "connected"];

/// A simulated device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub connected: bool,
    #[serde(default)]
    pub paired_api_keys: BTreeSet<ApiKeyToken>,
    #[serde(default)]
    pub active_actions: BTreeMap<ActionId, Action>,
    #[serde(flatten)]
    pub state: DeviceState,
}

impl Device {
    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        self.state.device_type()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Validation`] when `name` is empty or a numeric
    /// field is out of bounds.
    pub fn validate(&self) -> Result<(), HomeSimError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        self.state.validate()?;
        Ok(())
    }

    #[must_use]
    pub fn is_paired_with(&self, key: &ApiKeyToken) -> bool {
        self.paired_api_keys.contains(key)
    }

    /// Rebuild a device from its stored document.
    ///
    /// The `type` tag is checked first so that an unknown tag is reported as
    /// such rather than as a generic parse failure.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError`] when the tag is unknown or the document does
    /// not match the schema of its type.
    pub fn from_document(path: &str, document: Value) -> Result<Self, IntegrityError> {
        let type_tag = document
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if type_tag.parse::<DeviceType>().is_err() {
            return Err(IntegrityError::UnknownDeviceType {
                path: path.to_string(),
                type_tag: type_tag.to_string(),
            });
        }
        serde_json::from_value(document).map_err(|source| IntegrityError::MalformedDocument {
            path: path.to_string(),
            source,
        })
    }

    /// Attach the static capability metadata of this device's type.
    #[must_use]
    pub fn with_capabilities(self) -> DeviceWithCapabilities {
        let device_type = self.device_type();
        DeviceWithCapabilities {
            device: self,
            capabilities: device_type.capabilities(),
            read_only_fields: device_type.read_only_fields(),
            actions: device_type.actions(),
        }
    }
}

/// A device as exposed to clients: instance state plus type metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceWithCapabilities {
    #[serde(flatten)]
    pub device: Device,
    pub capabilities: &'static [Capability],
    pub read_only_fields: &'static [&'static str],
    pub actions: &'static [BuiltinAction],
}

/// Everything needed to create a device except its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDevice {
    pub name: String,
    pub connected: bool,
    pub state: DeviceState,
}

#[derive(Deserialize)]
struct CreationHeader {
    #[serde(default)]
    name: String,
    #[serde(default = "default_connected")]
    connected: bool,
}

fn default_connected() -> bool {
    true
}

impl NewDevice {
    /// A connected device with the given name and state.
    #[must_use]
    pub fn new(name: impl Into<String>, state: DeviceState) -> Self {
        Self {
            name: name.into(),
            connected: true,
            state,
        }
    }

    /// Parse a creation payload: `type` and `name` are required, every
    /// type-specific field is optional and defaults to the type's initial state.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Validation`] on a missing or unknown `type`,
    /// a field foreign to the type, a malformed value, or a bound violation.
    pub fn from_payload(payload: Map<String, Value>) -> Result<Self, HomeSimError> {
        let type_tag = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ValidationError::MissingField("type"))?;
        let device_type: DeviceType = type_tag
            .parse()
            .map_err(|_| ValidationError::UnknownDeviceType(type_tag.to_string()))?;

        let mut document = match serde_json::to_value(DeviceState::initial(device_type)) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(ValidationError::NotAnObject.into()),
            Err(err) => return Err(ValidationError::InvalidPayload(err).into()),
        };

        for (field, value) in &payload {
            let field = field.as_str();
            if CREATION_HEADER_FIELDS.contains(&field) {
                continue;
            }
            let known = device_type.writable_fields().contains(&field)
                || device_type.read_only_fields().contains(&field);
            if !known {
                return Err(ValidationError::UnknownField(field.to_string()).into());
            }
            document.insert(field.to_string(), value.clone());
        }

        let header: CreationHeader = serde_json::from_value(Value::Object(payload))
            .map_err(ValidationError::InvalidPayload)?;
        let state: DeviceState = serde_json::from_value(Value::Object(document))
            .map_err(ValidationError::InvalidPayload)?;

        let new_device = Self {
            name: header.name,
            connected: header.connected,
            state,
        };
        new_device.clone().into_device(DeviceId::new()).validate()?;
        Ok(new_device)
    }

    /// Assign an identity, producing an unpaired device with no actions.
    #[must_use]
    pub fn into_device(self, id: DeviceId) -> Device {
        Device {
            id,
            name: self.name,
            connected: self.connected,
            paired_api_keys: BTreeSet::new(),
            active_actions: BTreeMap::new(),
            state: self.state,
        }
    }
}
