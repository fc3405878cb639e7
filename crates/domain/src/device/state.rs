//! Type-specific device state.

use serde::{Deserialize, Serialize};

use crate::capability::DeviceType;
use crate::error::ValidationError;

/// Fixed palette of limited-color bulbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitedColor {
    Red,
    Green,
    Blue,
}

/// White-spectrum setting of temperature-color bulbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorTemperature {
    Warm,
    Neutral,
    Cool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClimateMode {
    Cool,
    Heat,
    Fan,
    Dry,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanSpeed {
    Low,
    Medium,
    High,
    Auto,
}

pub const BRIGHTNESS_RANGE: (f64, f64) = (0.0, 100.0);
pub const POSITION_RANGE: (f64, f64) = (0.0, 100.0);
pub const TARGET_TEMPERATURE_RANGE: (f64, f64) = (16.0, 30.0);
pub const TEMPERATURE_RANGE: (f64, f64) = (-40.0, 60.0);
pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);

/// State of a device, tagged by its `type`.
///
/// Stored flattened next to the common [`Device`](super::Device) fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DeviceState {
    BulbOnOff {
        on: bool,
    },
    BulbRgbBrightness {
        on: bool,
        rgb: [u8; 3],
        brightness: u8,
    },
    BulbLimitedColor {
        on: bool,
        color: LimitedColor,
    },
    BulbLimitedColorBrightness {
        on: bool,
        color: LimitedColor,
        brightness: u8,
    },
    BulbTemperatureColor {
        on: bool,
        color: ColorTemperature,
    },
    Curtain {
        /// Percent open.
        position: u8,
    },
    AirConditioner {
        on: bool,
        mode: ClimateMode,
        target_temperature: f64,
        fan_speed: FanSpeed,
    },
    SolarPanel {
        /// Instantaneous output in W.
        current_output: f64,
        /// Energy produced since local midnight in kWh.
        daily_output: f64,
        exporting_to_grid: bool,
    },
    Thermometer {
        /// Degrees Celsius.
        temperature: f64,
    },
    HumiditySensor {
        /// Relative humidity in percent.
        humidity: f64,
    },
    PowerMeter {
        /// Instantaneous draw in W.
        current_consumption: f64,
        /// Accumulated energy in kWh.
        total_consumption: f64,
    },
}

impl DeviceState {
    /// Initial state of a freshly created device of the given type.
    #[must_use]
    pub fn initial(device_type: DeviceType) -> Self {
        match device_type {
            DeviceType::BulbOnOff => Self::BulbOnOff { on: false },
            DeviceType::BulbRgbBrightness => Self::BulbRgbBrightness {
                on: false,
                rgb: [255, 255, 255],
                brightness: 100,
            },
            DeviceType::BulbLimitedColor => Self::BulbLimitedColor {
                on: false,
                color: LimitedColor::Red,
            },
            DeviceType::BulbLimitedColorBrightness => Self::BulbLimitedColorBrightness {
                on: false,
                color: LimitedColor::Red,
                brightness: 100,
            },
            DeviceType::BulbTemperatureColor => Self::BulbTemperatureColor {
                on: false,
                color: ColorTemperature::Neutral,
            },
            DeviceType::Curtain => Self::Curtain { position: 0 },
            DeviceType::AirConditioner => Self::AirConditioner {
                on: false,
                mode: ClimateMode::Auto,
                target_temperature: 22.0,
                fan_speed: FanSpeed::Auto,
            },
            DeviceType::SolarPanel => Self::SolarPanel {
                current_output: 0.0,
                daily_output: 0.0,
                exporting_to_grid: false,
            },
            DeviceType::Thermometer => Self::Thermometer { temperature: 21.0 },
            DeviceType::HumiditySensor => Self::HumiditySensor { humidity: 45.0 },
            DeviceType::PowerMeter => Self::PowerMeter {
                current_consumption: 0.0,
                total_consumption: 0.0,
            },
        }
    }

    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        match self {
            Self::BulbOnOff { .. } => DeviceType::BulbOnOff,
            Self::BulbRgbBrightness { .. } => DeviceType::BulbRgbBrightness,
            Self::BulbLimitedColor { .. } => DeviceType::BulbLimitedColor,
            Self::BulbLimitedColorBrightness { .. } => DeviceType::BulbLimitedColorBrightness,
            Self::BulbTemperatureColor { .. } => DeviceType::BulbTemperatureColor,
            Self::Curtain { .. } => DeviceType::Curtain,
            Self::AirConditioner { .. } => DeviceType::AirConditioner,
            Self::SolarPanel { .. } => DeviceType::SolarPanel,
            Self::Thermometer { .. } => DeviceType::Thermometer,
            Self::HumiditySensor { .. } => DeviceType::HumiditySensor,
            Self::PowerMeter { .. } => DeviceType::PowerMeter,
        }
    }

    /// Check every numeric field against its declared bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::OutOfRange`] for the first field out of bounds.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::BulbOnOff { .. }
            | Self::BulbLimitedColor { .. }
            | Self::BulbTemperatureColor { .. } => Ok(()),
            Self::BulbRgbBrightness { brightness, .. }
            | Self::BulbLimitedColorBrightness { brightness, .. } => {
                check_range("brightness", f64::from(*brightness), BRIGHTNESS_RANGE)
            }
            Self::Curtain { position } => {
                check_range("position", f64::from(*position), POSITION_RANGE)
            }
            Self::AirConditioner {
                target_temperature, ..
            } => check_range(
                "targetTemperature",
                *target_temperature,
                TARGET_TEMPERATURE_RANGE,
            ),
            Self::SolarPanel {
                current_output,
                daily_output,
                ..
            } => {
                check_non_negative("currentOutput", *current_output)?;
                check_non_negative("dailyOutput", *daily_output)
            }
            Self::Thermometer { temperature } => {
                check_range("temperature", *temperature, TEMPERATURE_RANGE)
            }
            Self::HumiditySensor { humidity } => {
                check_range("humidity", *humidity, HUMIDITY_RANGE)
            }
            Self::PowerMeter {
                current_consumption,
                total_consumption,
            } => {
                check_non_negative("currentConsumption", *current_consumption)?;
                check_non_negative("totalConsumption", *total_consumption)
            }
        }
    }
}

fn check_range(
    field: &'static str,
    value: f64,
    (min, max): (f64, f64),
) -> Result<(), ValidationError> {
    // NaN fails both comparisons, so it is rejected as well.
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    check_range(field, value, (0.0, f64::INFINITY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_produce_valid_initial_state_for_every_type() {
        for ty in DeviceType::ALL {
            let state = DeviceState::initial(ty);
            assert_eq!(state.device_type(), ty);
            assert!(state.validate().is_ok(), "{ty}");
        }
    }

    #[test]
    fn should_serialize_with_type_tag_and_camel_case_fields() {
        let state = DeviceState::AirConditioner {
            on: true,
            mode: ClimateMode::Cool,
            target_temperature: 21.5,
            fan_speed: FanSpeed::High,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "air_conditioner",
                "on": true,
                "mode": "cool",
                "targetTemperature": 21.5,
                "fanSpeed": "high"
            })
        );
    }

    #[test]
    fn should_reject_brightness_above_100() {
        let state = DeviceState::BulbRgbBrightness {
            on: true,
            rgb: [0, 0, 0],
            brightness: 101,
        };
        assert!(matches!(
            state.validate(),
            Err(ValidationError::OutOfRange {
                field: "brightness",
                ..
            })
        ));
    }

    #[test]
    fn should_reject_rgb_component_above_255_at_parse_time() {
        let json = json!({"type": "bulb_rgb_brightness", "on": true, "rgb": [0, 256, 0], "brightness": 5});
        assert!(serde_json::from_value::<DeviceState>(json).is_err());
    }

    #[test]
    fn should_reject_color_outside_palette() {
        let json = json!({"type": "bulb_temperature_color", "on": true, "color": "purple"});
        assert!(serde_json::from_value::<DeviceState>(json).is_err());
    }

    #[test]
    fn should_reject_negative_consumption() {
        let state = DeviceState::PowerMeter {
            current_consumption: -1.0,
            total_consumption: 0.0,
        };
        assert!(state.validate().is_err());
    }

    #[test]
    fn should_reject_nan_temperature() {
        let state = DeviceState::Thermometer {
            temperature: f64::NAN,
        };
        assert!(state.validate().is_err());
    }

    #[test]
    fn should_accept_integer_json_for_float_fields() {
        let json = json!({"type": "thermometer", "temperature": 20});
        let state: DeviceState = serde_json::from_value(json).unwrap();
        assert_eq!(state, DeviceState::Thermometer { temperature: 20.0 });
    }
}
