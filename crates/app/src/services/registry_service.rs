//! Registry service — devices, API keys and the pairings between them.
//!
//! Every device read-modify-write (state update, pairing, action bookkeeping)
//! runs under a per-device async lock, so concurrent writers of the same
//! device never lose each other's fields. API-key writes are serialized the
//! same way under a per-key lock, taken before any device lock. After a successful state update the
//! delta is handed to the [`WebhookNotifier`] on spawned tasks; delivery never
//! affects the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use homesim_domain::action::Action;
use homesim_domain::api_key::ApiKey;
use homesim_domain::device::{Device, DeviceWithCapabilities, NewDevice};
use homesim_domain::error::{HomeSimError, IntegrityError, NotFoundError, ValidationError};
use homesim_domain::id::{ActionId, ApiKeyToken, DeviceId};
use homesim_domain::time::now;
use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::{Map, Value};

use crate::ports::{DocumentStore, WebhookNotifier};

const DEVICES: &str = "/devices";
const API_KEYS: &str = "/apikeys";

/// Device fields a state update never overwrites.
const DEVICE_IDENTITY_FIELDS: &[&str] = &["id", "type"];
/// API-key field an update never overwrites.
const API_KEY_IDENTITY_FIELD: &str = "key";

fn device_path(id: DeviceId) -> String {
    format!("{DEVICES}/{id}")
}

/// Store path of a key, or `None` for a token that was never issued.
fn api_key_path(key: &ApiKeyToken) -> Option<String> {
    key.is_well_formed().then(|| format!("{API_KEYS}/{key}"))
}

fn encoding_error(err: serde_json::Error) -> HomeSimError {
    HomeSimError::Storage(Box::new(err))
}

fn into_object(value: Value) -> Result<Map<String, Value>, HomeSimError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ValidationError::NotAnObject.into()),
    }
}

fn device_document(device: &Device) -> Result<Map<String, Value>, HomeSimError> {
    into_object(serde_json::to_value(device).map_err(encoding_error)?)
}

fn api_key_document(api_key: &ApiKey) -> Result<Map<String, Value>, HomeSimError> {
    into_object(serde_json::to_value(api_key).map_err(encoding_error)?)
}

fn parse_api_key(path: &str, document: Value) -> Result<ApiKey, HomeSimError> {
    serde_json::from_value(document).map_err(|source| {
        IntegrityError::MalformedDocument {
            path: path.to_string(),
            source,
        }
        .into()
    })
}

fn generate_token() -> ApiKeyToken {
    let mut bytes = [0u8; ApiKeyToken::BYTES];
    OsRng.fill_bytes(&mut bytes);
    ApiKeyToken::from_bytes(&bytes)
}

/// Result of [`RegistryService::pair_device_with_api_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    Paired,
    UnknownDevice,
    UnknownApiKey,
}

impl Pairing {
    #[must_use]
    pub fn is_paired(self) -> bool {
        self == Self::Paired
    }
}

type LockTable<K> = Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>;

fn lock_for<K: Eq + std::hash::Hash + Clone>(
    table: &LockTable<K>,
    key: &K,
) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = table.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(key.clone()).or_default())
}

fn forget_lock<K: Eq + std::hash::Hash>(table: &LockTable<K>, key: &K) {
    table
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(key);
}

/// Application service for the device and API-key registries.
pub struct RegistryService<S, N> {
    store: S,
    notifier: Arc<N>,
    device_locks: LockTable<DeviceId>,
    api_key_locks: LockTable<ApiKeyToken>,
}

impl<S, N> RegistryService<S, N>
where
    S: DocumentStore,
    N: WebhookNotifier + 'static,
{
    /// Create a new service backed by the given store and notifier.
    pub fn new(store: S, notifier: N) -> Self {
        Self {
            store,
            notifier: Arc::new(notifier),
            device_locks: Mutex::new(HashMap::new()),
            api_key_locks: Mutex::new(HashMap::new()),
        }
    }

    fn device_lock(&self, id: DeviceId) -> Arc<tokio::sync::Mutex<()>> {
        lock_for(&self.device_locks, &id)
    }

    fn forget_device_lock(&self, id: DeviceId) {
        forget_lock(&self.device_locks, &id);
    }

    fn api_key_lock(&self, key: &ApiKeyToken) -> Arc<tokio::sync::Mutex<()>> {
        lock_for(&self.api_key_locks, key)
    }

    fn forget_api_key_lock(&self, key: &ApiKeyToken) {
        forget_lock(&self.api_key_locks, key);
    }

    #[cfg(test)]
    fn lock_counts(&self) -> (usize, usize) {
        let devices = self
            .device_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let api_keys = self
            .api_key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        (devices, api_keys)
    }

    async fn collection(&self, path: &str) -> Result<Map<String, Value>, HomeSimError> {
        match self.store.get(path).await? {
            None => Ok(Map::new()),
            Some(Value::Object(documents)) => Ok(documents),
            Some(_) => Err(IntegrityError::NotACollection {
                path: path.to_string(),
            }
            .into()),
        }
    }

    // ── Devices ─────────────────────────────────────────────────────────

    /// Persist a new device under a freshly generated id.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Validation`] if the device violates its
    /// bounds, or a storage error from the store.
    #[tracing::instrument(skip(self, new_device), fields(name = %new_device.name))]
    pub async fn create_device(&self, new_device: NewDevice) -> Result<Device, HomeSimError> {
        let device = new_device.into_device(DeviceId::new());
        device.validate()?;
        self.store
            .put(
                &device_path(device.id),
                Value::Object(device_document(&device)?),
            )
            .await?;
        tracing::info!(device_id = %device.id, device_type = %device.device_type(), "device created");
        self.get_device(device.id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Device",
                id: device.id.to_string(),
            }
            .into()
        })
    }

    /// Look up a device by id.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Integrity`] if the stored document cannot be
    /// hydrated, or a storage error from the store.
    pub async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, HomeSimError> {
        let path = device_path(id);
        match self.store.get(&path).await? {
            Some(document) => Ok(Some(Device::from_document(&path, document)?)),
            None => Ok(None),
        }
    }

    /// List every device.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Integrity`] if any stored document cannot be
    /// hydrated, or a storage error from the store.
    pub async fn get_devices(&self) -> Result<Vec<Device>, HomeSimError> {
        self.collection(DEVICES)
            .await?
            .into_iter()
            .map(|(id, document)| {
                Device::from_document(&format!("{DEVICES}/{id}"), document).map_err(Into::into)
            })
            .collect()
    }

    /// Delete a device. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    #[tracing::instrument(skip(self))]
    pub async fn delete_device(&self, id: DeviceId) -> Result<bool, HomeSimError> {
        let lock = self.device_lock(id);
        let deleted = {
            let _guard = lock.lock().await;
            self.store.delete(&device_path(id)).await?
        };
        self.forget_device_lock(id);
        if deleted {
            tracing::info!("device deleted");
        }
        Ok(deleted)
    }

    /// Merge `partial` into a device's document and persist the result.
    ///
    /// `id` and `type` in `partial` are ignored. Read-only enforcement is the
    /// caller's job: the simulator legitimately writes sensor readings here.
    /// Once persisted, the state is re-read and one webhook notification is
    /// dispatched per paired, active key with a webhook URL, carrying the
    /// previous document and the requested fields of the new one.
    ///
    /// Returns `None` when the device does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Validation`] when the merged state is
    /// malformed or out of bounds (nothing is written in that case),
    /// [`HomeSimError::Integrity`] for an unreadable stored document, or a
    /// storage error from the store.
    #[tracing::instrument(skip(self, partial))]
    pub async fn update_device_state(
        &self,
        id: DeviceId,
        partial: Map<String, Value>,
    ) -> Result<Option<Device>, HomeSimError> {
        let lock = self.device_lock(id);
        let guard = lock.lock().await;

        let Some(current) = self.get_device(id).await? else {
            drop(guard);
            self.forget_device_lock(id);
            return Ok(None);
        };
        let previous = device_document(&current)?;

        let mut merged = previous.clone();
        for (field, value) in &partial {
            if !DEVICE_IDENTITY_FIELDS.contains(&field.as_str()) {
                merged.insert(field.clone(), value.clone());
            }
        }
        let updated: Device = serde_json::from_value(Value::Object(merged))
            .map_err(ValidationError::InvalidPayload)?;
        updated.validate()?;

        self.store
            .put(&device_path(id), Value::Object(device_document(&updated)?))
            .await?;
        let Some(stored) = self.get_device(id).await? else {
            return Ok(None);
        };
        drop(guard);

        let stored_document = device_document(&stored)?;
        let new_state: Map<String, Value> = partial
            .keys()
            .filter(|field| !DEVICE_IDENTITY_FIELDS.contains(&field.as_str()))
            .filter_map(|field| {
                stored_document
                    .get(field)
                    .map(|value| (field.clone(), value.clone()))
            })
            .collect();
        self.dispatch_webhooks(&stored, &previous, &new_state).await;

        Ok(Some(stored))
    }

    async fn dispatch_webhooks(
        &self,
        device: &Device,
        previous: &Map<String, Value>,
        new_state: &Map<String, Value>,
    ) {
        for key in &device.paired_api_keys {
            let api_key = match self.get_api_key(key).await {
                Ok(Some(api_key)) if api_key.is_active && api_key.webhook_target().is_some() => {
                    api_key
                }
                Ok(_) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, device_id = %device.id, "skipping webhook of unreadable api key");
                    continue;
                }
            };
            let notifier = Arc::clone(&self.notifier);
            let device = device.clone();
            let previous = previous.clone();
            let new_state = new_state.clone();
            tokio::spawn(async move {
                let delivered = notifier
                    .notify(&api_key, &device, &previous, &new_state)
                    .await;
                tracing::debug!(device_id = %device.id, api_key = %api_key.name, delivered, "webhook dispatched");
            });
        }
    }

    /// Run a read-modify-write of a whole device document under its lock.
    async fn modify_device<F>(&self, id: DeviceId, change: F) -> Result<bool, HomeSimError>
    where
        F: FnOnce(&mut Device) + Send,
    {
        let lock = self.device_lock(id);
        let guard = lock.lock().await;

        let Some(mut device) = self.get_device(id).await? else {
            drop(guard);
            self.forget_device_lock(id);
            return Ok(false);
        };
        change(&mut device);
        self.store
            .put(&device_path(id), Value::Object(device_document(&device)?))
            .await?;
        Ok(true)
    }

    /// Write one entry of a device's `activeActions` at its own path.
    ///
    /// Returns `false` when the device does not exist. No webhook is sent.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn record_action(
        &self,
        id: DeviceId,
        action_id: &ActionId,
        action: &Action,
    ) -> Result<bool, HomeSimError> {
        let lock = self.device_lock(id);
        let guard = lock.lock().await;

        let path = device_path(id);
        if self.store.get(&path).await?.is_none() {
            drop(guard);
            self.forget_device_lock(id);
            return Ok(false);
        }
        let value = serde_json::to_value(action).map_err(encoding_error)?;
        self.store
            .put(&format!("{path}/activeActions/{action_id}"), value)
            .await?;
        tracing::debug!(device_id = %id, %action_id, status = %action.status, "action recorded");
        Ok(true)
    }

    /// Every device decorated with its type's capability metadata.
    ///
    /// # Errors
    ///
    /// Same as [`get_devices`](Self::get_devices).
    pub async fn get_devices_with_capabilities(
        &self,
    ) -> Result<Vec<DeviceWithCapabilities>, HomeSimError> {
        Ok(self
            .get_devices()
            .await?
            .into_iter()
            .map(Device::with_capabilities)
            .collect())
    }

    /// One device decorated with its type's capability metadata.
    ///
    /// # Errors
    ///
    /// Same as [`get_device`](Self::get_device).
    pub async fn get_device_with_capabilities(
        &self,
        id: DeviceId,
    ) -> Result<Option<DeviceWithCapabilities>, HomeSimError> {
        Ok(self.get_device(id).await?.map(Device::with_capabilities))
    }

    /// Devices paired with the given key.
    ///
    /// # Errors
    ///
    /// Same as [`get_devices`](Self::get_devices).
    pub async fn get_devices_for_api_key(
        &self,
        key: &ApiKeyToken,
    ) -> Result<Vec<Device>, HomeSimError> {
        Ok(self
            .get_devices()
            .await?
            .into_iter()
            .filter(|device| device.is_paired_with(key))
            .collect())
    }

    // ── API keys ────────────────────────────────────────────────────────

    /// Issue a new, active key from 32 random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Validation`] for an empty name or an invalid
    /// webhook URL, or a storage error from the store.
    #[tracing::instrument(skip(self))]
    pub async fn create_api_key(
        &self,
        name: &str,
        webhook_url: Option<String>,
    ) -> Result<ApiKey, HomeSimError> {
        let mut api_key = ApiKey::new(generate_token(), name, now());
        api_key.webhook_url = webhook_url;
        api_key.validate()?;

        self.store
            .put(
                &format!("{API_KEYS}/{}", api_key.key),
                Value::Object(api_key_document(&api_key)?),
            )
            .await?;
        tracing::info!("api key created");
        self.get_api_key(&api_key.key).await?.ok_or_else(|| {
            NotFoundError {
                entity: "ApiKey",
                id: name.to_string(),
            }
            .into()
        })
    }

    /// Look up a key by its token. A malformed token is never found.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Integrity`] for a malformed document, or a
    /// storage error from the store.
    pub async fn get_api_key(&self, key: &ApiKeyToken) -> Result<Option<ApiKey>, HomeSimError> {
        let Some(path) = api_key_path(key) else {
            return Ok(None);
        };
        match self.store.get(&path).await? {
            Some(document) => Ok(Some(parse_api_key(&path, document)?)),
            None => Ok(None),
        }
    }

    /// List every key.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Integrity`] for a malformed document, or a
    /// storage error from the store.
    pub async fn get_api_keys(&self) -> Result<Vec<ApiKey>, HomeSimError> {
        self.collection(API_KEYS)
            .await?
            .into_iter()
            .map(|(key, document)| parse_api_key(&format!("{API_KEYS}/{key}"), document))
            .collect()
    }

    /// List the keys with `isActive` set.
    ///
    /// # Errors
    ///
    /// Same as [`get_api_keys`](Self::get_api_keys).
    pub async fn get_active_api_keys(&self) -> Result<Vec<ApiKey>, HomeSimError> {
        Ok(self
            .get_api_keys()
            .await?
            .into_iter()
            .filter(|api_key| api_key.is_active)
            .collect())
    }

    /// Merge `partial` into a key (the `key` field itself is ignored).
    ///
    /// Returns `None` when the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Validation`] when the merged key is malformed,
    /// or a storage error from the store.
    #[tracing::instrument(skip(self, partial))]
    pub async fn update_api_key(
        &self,
        key: &ApiKeyToken,
        partial: Map<String, Value>,
    ) -> Result<Option<ApiKey>, HomeSimError> {
        let Some(path) = api_key_path(key) else {
            return Ok(None);
        };
        let lock = self.api_key_lock(key);
        let guard = lock.lock().await;

        let Some(current) = self.get_api_key(key).await? else {
            drop(guard);
            self.forget_api_key_lock(key);
            return Ok(None);
        };
        let mut merged = api_key_document(&current)?;
        for (field, value) in partial {
            if field != API_KEY_IDENTITY_FIELD {
                merged.insert(field, value);
            }
        }
        let updated: ApiKey = serde_json::from_value(Value::Object(merged))
            .map_err(ValidationError::InvalidPayload)?;
        updated.validate()?;

        self.store
            .put(&path, Value::Object(api_key_document(&updated)?))
            .await?;
        self.get_api_key(key).await
    }

    /// Stamp `lastUsed` with the current time and return the key as stored.
    ///
    /// Only the `lastUsed` field is written, so a concurrent update of the
    /// key's other fields is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn record_api_key_use(
        &self,
        key: &ApiKeyToken,
    ) -> Result<Option<ApiKey>, HomeSimError> {
        let Some(path) = api_key_path(key) else {
            return Ok(None);
        };
        let lock = self.api_key_lock(key);
        let guard = lock.lock().await;

        if self.store.get(&path).await?.is_none() {
            drop(guard);
            self.forget_api_key_lock(key);
            return Ok(None);
        }
        let stamp = serde_json::to_value(now()).map_err(encoding_error)?;
        self.store.put(&format!("{path}/lastUsed"), stamp).await?;
        self.get_api_key(key).await
    }

    /// Delete a key and unpair it from every device. Returns whether it
    /// existed.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    #[tracing::instrument(skip(self))]
    pub async fn delete_api_key(&self, key: &ApiKeyToken) -> Result<bool, HomeSimError> {
        let Some(path) = api_key_path(key) else {
            return Ok(false);
        };
        let lock = self.api_key_lock(key);
        let guard = lock.lock().await;

        let deleted = self.store.delete(&path).await?;
        if deleted {
            for device in self.get_devices_for_api_key(key).await? {
                self.unpair_device_from_api_key(device.id, key).await?;
            }
            tracing::info!("api key deleted");
        }
        drop(guard);
        self.forget_api_key_lock(key);
        Ok(deleted)
    }

    // ── Pairing ─────────────────────────────────────────────────────────

    /// Allow `key` to see and control a device. Pairing twice is a no-op.
    ///
    /// Both sides must exist; the outcome names the missing one otherwise.
    /// The key's lock is held throughout, so a concurrent
    /// [`delete_api_key`](Self::delete_api_key) cannot leave the device
    /// paired with a deleted key.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    #[tracing::instrument(skip(self))]
    pub async fn pair_device_with_api_key(
        &self,
        id: DeviceId,
        key: &ApiKeyToken,
    ) -> Result<Pairing, HomeSimError> {
        if api_key_path(key).is_none() {
            return Ok(Pairing::UnknownApiKey);
        }
        let lock = self.api_key_lock(key);
        let guard = lock.lock().await;

        if self.get_api_key(key).await?.is_none() {
            drop(guard);
            self.forget_api_key_lock(key);
            return Ok(Pairing::UnknownApiKey);
        }
        let paired = self
            .modify_device(id, |device| {
                device.paired_api_keys.insert(key.clone());
            })
            .await?;
        Ok(if paired {
            Pairing::Paired
        } else {
            Pairing::UnknownDevice
        })
    }

    /// Revoke `key`'s access to a device. Unpairing an unpaired key succeeds.
    ///
    /// Returns `false` when the device does not exist.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    #[tracing::instrument(skip(self))]
    pub async fn unpair_device_from_api_key(
        &self,
        id: DeviceId,
        key: &ApiKeyToken,
    ) -> Result<bool, HomeSimError> {
        self.modify_device(id, |device| {
            device.paired_api_keys.remove(key);
        })
        .await
    }
}
