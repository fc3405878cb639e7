//! Sensor physics: pure functions from the previous reading to the next one.
//!
//! Randomness and wall-clock time are injected so every step is
//! deterministic under test.

use std::f64::consts::PI;
use std::time::Duration;

use homesim_domain::device::DeviceState;
use rand::Rng;
use serde_json::{Map, Value};

pub const THERMOMETER_RANGE: (f64, f64) = (18.0, 26.0);
pub const THERMOMETER_STEP: f64 = 0.5;

pub const HUMIDITY_RANGE: (f64, f64) = (30.0, 70.0);
pub const HUMIDITY_STEP: f64 = 2.0;

/// Base household load in W.
pub const POWER_BASE_LOAD: f64 = 500.0;
/// Amplitude of the uniform noise around the base load, in W.
pub const POWER_NOISE: f64 = 200.0;

/// Nameplate peak of a solar panel in W; the midday output is half of it.
pub const SOLAR_PEAK: f64 = 5000.0;
/// Output above which a panel exports to the grid, in W.
pub const GRID_EXPORT_THRESHOLD: f64 = 2000.0;

const JOULES_PER_KWH: f64 = 3_600_000.0;

/// Round half away from zero to `decimals` places.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Bounded random walk: add `step`, clamp to `range`, keep one decimal.
#[must_use]
pub fn random_walk(current: f64, step: f64, (min, max): (f64, f64)) -> f64 {
    round_to((current + step).clamp(min, max), 1)
}

/// Instantaneous consumption for a given noise sample, never negative.
#[must_use]
pub fn power_draw(noise: f64) -> f64 {
    round_to((POWER_BASE_LOAD + noise).max(0.0), 1)
}

/// Decimals kept on stored energy totals.
pub const KWH_DECIMALS: i32 = 3;

/// Add the energy of `watts` sustained over `interval` to `total_kwh`.
#[must_use]
pub fn accumulate_kwh(total_kwh: f64, watts: f64, interval: Duration) -> f64 {
    total_kwh + watts * interval.as_secs_f64() / JOULES_PER_KWH
}

/// Unrounded running total behind one device's stored kWh reading.
///
/// Stored totals keep [`KWH_DECIMALS`] places, so a tick's energy is often
/// smaller than the last stored digit. The meter carries the exact sum across
/// ticks and only the reported value is rounded. When the stored reading no
/// longer matches the meter (midnight reset, admin write, restart) the meter
/// restarts from the stored value.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyMeter {
    exact_kwh: Option<f64>,
}

impl EnergyMeter {
    /// Add `watts` over `interval` and return the new stored reading.
    pub fn accumulate(&mut self, stored_kwh: f64, watts: f64, interval: Duration) -> f64 {
        let base = match self.exact_kwh {
            Some(exact) if (round_to(exact, KWH_DECIMALS) - stored_kwh).abs() < 1e-9 => exact,
            _ => stored_kwh,
        };
        let exact = accumulate_kwh(base, watts, interval);
        self.exact_kwh = Some(exact);
        round_to(exact, KWH_DECIMALS)
    }
}

/// Solar output for a fractional local hour: a half-sine from 06:00 to 18:00
/// peaking at noon, zero at night.
#[must_use]
pub fn solar_output(hour: f64) -> f64 {
    let output = SOLAR_PEAK / 2.0 * (2.0 * PI * (hour - 6.0) / 24.0).sin();
    round_to(output.max(0.0), 1)
}

#[must_use]
pub fn is_exporting(output: f64) -> bool {
    output > GRID_EXPORT_THRESHOLD
}

fn uniform<R: Rng>(rng: &mut R, amplitude: f64) -> f64 {
    rng.gen_range(-amplitude..=amplitude)
}

/// Next reading of a simulated device as a partial state update.
///
/// `hour` is the local fractional hour of day used by solar panels and
/// `meter` carries the device's exact energy total. Returns `None` for types
/// the simulator does not drive.
pub fn next_reading<R: Rng>(
    state: &DeviceState,
    interval: Duration,
    hour: f64,
    rng: &mut R,
    meter: &mut EnergyMeter,
) -> Option<Map<String, Value>> {
    let mut update = Map::new();
    match state {
        DeviceState::Thermometer { temperature } => {
            let step = uniform(rng, THERMOMETER_STEP);
            update.insert(
                "temperature".to_string(),
                Value::from(random_walk(*temperature, step, THERMOMETER_RANGE)),
            );
        }
        DeviceState::HumiditySensor { humidity } => {
            let step = uniform(rng, HUMIDITY_STEP);
            update.insert(
                "humidity".to_string(),
                Value::from(random_walk(*humidity, step, HUMIDITY_RANGE)),
            );
        }
        DeviceState::PowerMeter {
            total_consumption, ..
        } => {
            let watts = power_draw(uniform(rng, POWER_NOISE));
            update.insert("currentConsumption".to_string(), Value::from(watts));
            update.insert(
                "totalConsumption".to_string(),
                Value::from(meter.accumulate(*total_consumption, watts, interval)),
            );
        }
        DeviceState::SolarPanel { daily_output, .. } => {
            let watts = solar_output(hour);
            update.insert("currentOutput".to_string(), Value::from(watts));
            update.insert(
                "dailyOutput".to_string(),
                Value::from(meter.accumulate(*daily_output, watts, interval)),
            );
            update.insert("exportingToGrid".to_string(), Value::from(is_exporting(watts)));
        }
        DeviceState::BulbOnOff { .. }
        | DeviceState::BulbRgbBrightness { .. }
        | DeviceState::BulbLimitedColor { .. }
        | DeviceState::BulbLimitedColorBrightness { .. }
        | DeviceState::BulbTemperatureColor { .. }
        | DeviceState::Curtain { .. }
        | DeviceState::AirConditioner { .. } => return None,
    }
    Some(update)
}
