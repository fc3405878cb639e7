//! Static, type-derived metadata: device types, capabilities, read-only
//! fields and built-in actions.
//!
//! Everything here is a compiled-in lookup table keyed by [`DeviceType`].
//! Every table is an exhaustive `match`, so adding a device type fails to
//! compile until each table covers it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Closed enumeration of supported device types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    BulbOnOff,
    BulbRgbBrightness,
    BulbLimitedColor,
    BulbLimitedColorBrightness,
    BulbTemperatureColor,
    Curtain,
    AirConditioner,
    SolarPanel,
    Thermometer,
    HumiditySensor,
    PowerMeter,
}

/// What a device type exposes on its control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Power,
    Brightness,
    RgbColor,
    LimitedColor,
    ColorTemperature,
    Position,
    ClimateMode,
    TargetTemperature,
    FanSpeed,
    TemperatureReading,
    HumidityReading,
    PowerReading,
    EnergyTotal,
    SolarGeneration,
    GridExport,
}

/// Long-running operations a device type supports out of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinAction {
    Open,
    Close,
}

/// Which HTTP surface a state update arrives through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSurface {
    /// Administrative API: may also rename a device or flip `connected`.
    Admin,
    /// API-key gated third-party API: type-specific controls only.
    ThirdParty,
}

/// Fields every device carries that no client may ever write.
const IMMUTABLE_FIELDS: &[&str] = &["id", "type"];
/// Fields managed by the registry and the action manager.
const MANAGED_FIELDS: &[&str] = &["pairedApiKeys", "activeActions"];
/// Common fields only the admin surface may write.
const ADMIN_FIELDS: &[&str] = &["name", "connected"];

impl DeviceType {
    pub const ALL: [Self; 11] = [
        Self::BulbOnOff,
        Self::BulbRgbBrightness,
        Self::BulbLimitedColor,
        Self::BulbLimitedColorBrightness,
        Self::BulbTemperatureColor,
        Self::Curtain,
        Self::AirConditioner,
        Self::SolarPanel,
        Self::Thermometer,
        Self::HumiditySensor,
        Self::PowerMeter,
    ];

    /// The `type` tag stored in device documents.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BulbOnOff => "bulb_on_off",
            Self::BulbRgbBrightness => "bulb_rgb_brightness",
            Self::BulbLimitedColor => "bulb_limited_color",
            Self::BulbLimitedColorBrightness => "bulb_limited_color_brightness",
            Self::BulbTemperatureColor => "bulb_temperature_color",
            Self::Curtain => "curtain",
            Self::AirConditioner => "air_conditioner",
            Self::SolarPanel => "solar_panel",
            Self::Thermometer => "thermometer",
            Self::HumiditySensor => "humidity_sensor",
            Self::PowerMeter => "power_meter",
        }
    }

    #[must_use]
    pub fn capabilities(self) -> &'static [Capability] {
        use Capability::{
            Brightness, ClimateMode, ColorTemperature, EnergyTotal, FanSpeed, GridExport,
            HumidityReading, LimitedColor, Position, Power, PowerReading, RgbColor,
            SolarGeneration, TargetTemperature, TemperatureReading,
        };

        match self {
            Self::BulbOnOff => &[Power],
            Self::BulbRgbBrightness => &[Power, RgbColor, Brightness],
            Self::BulbLimitedColor => &[Power, LimitedColor],
            Self::BulbLimitedColorBrightness => &[Power, LimitedColor, Brightness],
            Self::BulbTemperatureColor => &[Power, ColorTemperature],
            Self::Curtain => &[Position],
            Self::AirConditioner => &[Power, ClimateMode, TargetTemperature, FanSpeed],
            Self::SolarPanel => &[SolarGeneration, EnergyTotal, GridExport],
            Self::Thermometer => &[TemperatureReading],
            Self::HumiditySensor => &[HumidityReading],
            Self::PowerMeter => &[PowerReading, EnergyTotal],
        }
    }

    /// Type-specific fields a client may set.
    #[must_use]
    pub fn writable_fields(self) -> &'static [&'static str] {
        match self {
            Self::BulbOnOff => &["on"],
            Self::BulbRgbBrightness => &["on", "rgb", "brightness"],
            Self::BulbLimitedColor | Self::BulbTemperatureColor => &["on", "color"],
            Self::BulbLimitedColorBrightness => &["on", "color", "brightness"],
            Self::Curtain => &["position"],
            Self::AirConditioner => &["on", "mode", "targetTemperature", "fanSpeed"],
            Self::SolarPanel | Self::Thermometer | Self::HumiditySensor | Self::PowerMeter => &[],
        }
    }

    /// Type-specific fields only the simulator may set.
    #[must_use]
    pub fn read_only_fields(self) -> &'static [&'static str] {
        match self {
            Self::BulbOnOff
            | Self::BulbRgbBrightness
            | Self::BulbLimitedColor
            | Self::BulbLimitedColorBrightness
            | Self::BulbTemperatureColor
            | Self::Curtain
            | Self::AirConditioner => &[],
            Self::SolarPanel => &["currentOutput", "dailyOutput", "exportingToGrid"],
            Self::Thermometer => &["temperature"],
            Self::HumiditySensor => &["humidity"],
            Self::PowerMeter => &["currentConsumption", "totalConsumption"],
        }
    }

    #[must_use]
    pub fn actions(self) -> &'static [BuiltinAction] {
        match self {
            Self::Curtain => &[BuiltinAction::Open, BuiltinAction::Close],
            Self::BulbOnOff
            | Self::BulbRgbBrightness
            | Self::BulbLimitedColor
            | Self::BulbLimitedColorBrightness
            | Self::BulbTemperatureColor
            | Self::AirConditioner
            | Self::SolarPanel
            | Self::Thermometer
            | Self::HumiditySensor
            | Self::PowerMeter => &[],
        }
    }

    /// Look up a built-in action by name.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedAction`] when this type has no
    /// action called `name`.
    pub fn action(self, name: &str) -> Result<BuiltinAction, ValidationError> {
        self.actions()
            .iter()
            .copied()
            .find(|action| action.name() == name)
            .ok_or_else(|| ValidationError::UnsupportedAction {
                device_type: self.as_str(),
                action: name.to_string(),
            })
    }

    /// Whether the simulator drives this type.
    #[must_use]
    pub fn is_simulated(self) -> bool {
        !self.read_only_fields().is_empty()
    }

    /// Check that a partial update only touches fields the given surface may
    /// write for this type.
    ///
    /// # Errors
    ///
    /// Returns the first offending field as [`ValidationError::ImmutableField`],
    /// [`ValidationError::ReadOnlyField`] or [`ValidationError::UnknownField`].
    pub fn check_update(
        self,
        partial: &Map<String, Value>,
        surface: ControlSurface,
    ) -> Result<(), ValidationError> {
        for field in partial.keys() {
            let field = field.as_str();
            if IMMUTABLE_FIELDS.contains(&field) {
                return Err(ValidationError::ImmutableField(field.to_string()));
            }
            if self.read_only_fields().contains(&field) || MANAGED_FIELDS.contains(&field) {
                return Err(ValidationError::ReadOnlyField(field.to_string()));
            }
            let admin_only = ADMIN_FIELDS.contains(&field);
            if admin_only && surface == ControlSurface::Admin {
                continue;
            }
            if !self.writable_fields().contains(&field) {
                return Err(ValidationError::UnknownField(field.to_string()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a `type` tag names no known device type.
#[derive(Debug, thiserror::Error)]
#[error("unknown device type {0:?}")]
pub struct UnknownDeviceType(pub String);

impl FromStr for DeviceType {
    type Err = UnknownDeviceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| UnknownDeviceType(s.to_string()))
    }
}

impl BuiltinAction {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }

    /// How long the action runs before completing.
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::Open | Self::Close => Duration::from_secs(5),
        }
    }

    /// State written to the device once the action completes.
    #[must_use]
    pub fn completion_state(self) -> Map<String, Value> {
        let position = match self {
            Self::Open => 100,
            Self::Close => 0,
        };
        let mut state = Map::new();
        state.insert("position".to_string(), Value::from(position));
        state
    }
}
