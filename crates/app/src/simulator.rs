//! Simulator — periodic readings for sensor-like devices.
//!
//! Every device whose type has read-only fields (thermometer, humidity
//! sensor, power meter, solar panel) gets its own timer task. Each tick reads
//! the device, computes the next reading with [`physics`], and writes it
//! through [`RegistryService::update_device_state`] so paired subscribers
//! receive webhooks like for any other change. A separate task zeroes the
//! solar panels' `dailyOutput` at local midnight.

pub mod physics;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use homesim_domain::capability::DeviceType;
use homesim_domain::device::Device;
use homesim_domain::error::HomeSimError;
use homesim_domain::id::DeviceId;
use homesim_domain::time::{local_hour_of_day, now};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use self::physics::EnergyMeter;
use crate::ports::{DocumentStore, WebhookNotifier};
use crate::services::RegistryService;

/// Tick period used when none is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Time left until the next midnight of `now`'s timezone.
///
/// Falls back to 24 h when the next midnight does not exist locally.
#[must_use]
pub fn until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    now.date_naive()
        .succ_opt()
        .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.and_local_timezone(now.timezone()).earliest())
        .and_then(|midnight| (midnight - now.clone()).to_std().ok())
        .unwrap_or(DAY)
}

/// Drives simulated devices on timers.
pub struct Simulator<S, N> {
    registry: Arc<RegistryService<S, N>>,
    interval: Duration,
    timers: Mutex<HashMap<DeviceId, JoinHandle<()>>>,
    midnight: Mutex<Option<JoinHandle<()>>>,
}

impl<S, N> Simulator<S, N>
where
    S: DocumentStore + 'static,
    N: WebhookNotifier + 'static,
{
    /// Create a simulator ticking every `interval`; a zero interval falls back
    /// to [`DEFAULT_INTERVAL`].
    pub fn new(registry: Arc<RegistryService<S, N>>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            tracing::warn!("zero simulator interval, using the default");
            DEFAULT_INTERVAL
        } else {
            interval
        };
        Self {
            registry,
            interval,
            timers: Mutex::new(HashMap::new()),
            midnight: Mutex::new(None),
        }
    }

    /// Arm a timer for every simulated device and the midnight reset.
    ///
    /// Returns the number of devices tracked.
    ///
    /// # Errors
    ///
    /// Returns an error if the device list cannot be loaded.
    pub async fn start(&self) -> Result<usize, HomeSimError> {
        let devices = self.registry.get_devices().await?;
        let tracked = devices
            .iter()
            .filter(|device| self.track_device(device))
            .count();
        self.arm_midnight_reset();
        tracing::info!(tracked, interval = ?self.interval, "simulator started");
        Ok(tracked)
    }

    /// Start simulating `device`.
    ///
    /// Returns `false` when its type is not simulated or a live timer already
    /// exists for it.
    pub fn track_device(&self, device: &Device) -> bool {
        if !device.device_type().is_simulated() {
            return false;
        }
        let mut timers = lock(&self.timers);
        if timers
            .get(&device.id)
            .is_some_and(|handle| !handle.is_finished())
        {
            return false;
        }
        let handle = tokio::spawn(run_device(
            Arc::clone(&self.registry),
            device.id,
            self.interval,
        ));
        timers.insert(device.id, handle);
        tracing::debug!(device_id = %device.id, device_type = %device.device_type(), "tracking device");
        true
    }

    /// Stop simulating a device. Returns whether a timer existed.
    pub fn untrack_device(&self, id: DeviceId) -> bool {
        match lock(&self.timers).remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Devices with a live timer, sorted.
    #[must_use]
    pub fn tracked_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = lock(&self.timers)
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Advance one device by one interval, outside of its timer.
    ///
    /// Energy totals start from the stored reading, without the sub-precision
    /// remainder the device's own timer carries. Returns `false` when the
    /// device no longer exists.
    ///
    /// # Errors
    ///
    /// Returns any error of the read or the write.
    pub async fn tick(&self, id: DeviceId) -> Result<bool, HomeSimError> {
        let mut rng = StdRng::from_entropy();
        let mut meter = EnergyMeter::default();
        step(&self.registry, id, self.interval, &mut rng, &mut meter).await
    }

    /// Zero `dailyOutput` on every solar panel. Returns how many were reset.
    pub async fn reset_daily_output(&self) -> usize {
        reset_daily_output(&self.registry).await
    }

    fn arm_midnight_reset(&self) {
        let registry = Arc::clone(&self.registry);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(until_next_midnight(&Local::now())).await;
                let reset = reset_daily_output(&registry).await;
                tracing::info!(reset, "daily solar output reset");
            }
        });
        if let Some(previous) = lock(&self.midnight).replace(handle) {
            previous.abort();
        }
    }

    /// Abort every timer, including the midnight reset.
    pub fn shutdown(&self) {
        let timers: Vec<JoinHandle<()>> = lock(&self.timers)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &timers {
            handle.abort();
        }
        if let Some(handle) = lock(&self.midnight).take() {
            handle.abort();
        }
        tracing::info!(count = timers.len(), "simulator stopped");
    }
}

async fn run_device<S, N>(registry: Arc<RegistryService<S, N>>, id: DeviceId, interval: Duration)
where
    S: DocumentStore,
    N: WebhookNotifier + 'static,
{
    let mut rng = StdRng::from_entropy();
    let mut meter = EnergyMeter::default();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match step(&registry, id, interval, &mut rng, &mut meter).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(device_id = %id, "device gone, stopping its simulation");
                return;
            }
            Err(err) => tracing::warn!(device_id = %id, error = %err, "simulation tick failed"),
        }
    }
}

async fn step<S, N, R>(
    registry: &RegistryService<S, N>,
    id: DeviceId,
    interval: Duration,
    rng: &mut R,
    meter: &mut EnergyMeter,
) -> Result<bool, HomeSimError>
where
    S: DocumentStore,
    N: WebhookNotifier + 'static,
    R: Rng + Send,
{
    let Some(device) = registry.get_device(id).await? else {
        return Ok(false);
    };
    let hour = local_hour_of_day(now());
    let Some(update) = physics::next_reading(&device.state, interval, hour, rng, meter) else {
        return Ok(false);
    };
    Ok(registry.update_device_state(id, update).await?.is_some())
}

async fn reset_daily_output<S, N>(registry: &RegistryService<S, N>) -> usize
where
    S: DocumentStore,
    N: WebhookNotifier + 'static,
{
    let devices = match registry.get_devices().await {
        Ok(devices) => devices,
        Err(err) => {
            tracing::warn!(error = %err, "cannot list devices for the daily reset");
            return 0;
        }
    };
    let mut reset = 0;
    for device in devices
        .iter()
        .filter(|device| device.device_type() == DeviceType::SolarPanel)
    {
        let mut update = Map::new();
        update.insert("dailyOutput".to_string(), Value::from(0.0));
        match registry.update_device_state(device.id, update).await {
            Ok(Some(_)) => reset += 1,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(device_id = %device.id, error = %err, "daily reset failed");
            }
        }
    }
    reset
}
