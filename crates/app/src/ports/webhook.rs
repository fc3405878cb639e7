//! Webhook port — outbound delivery of device state deltas.

use std::future::Future;

use homesim_domain::api_key::ApiKey;
use homesim_domain::device::Device;
use serde_json::{Map, Value};

/// Delivers a device's state delta to the webhook of one API key.
pub trait WebhookNotifier: Send + Sync {
    /// Send the fields of `new` that differ from `previous`.
    ///
    /// Resolves to `true` only when the subscriber acknowledged with a 2xx.
    /// Every failure (no URL, transport error, timeout, non-2xx) is reported
    /// as `false`; implementations log it and never retry.
    fn notify(
        &self,
        api_key: &ApiKey,
        device: &Device,
        previous: &Map<String, Value>,
        new: &Map<String, Value>,
    ) -> impl Future<Output = bool> + Send;
}

impl<T: WebhookNotifier> WebhookNotifier for std::sync::Arc<T> {
    fn notify(
        &self,
        api_key: &ApiKey,
        device: &Device,
        previous: &Map<String, Value>,
        new: &Map<String, Value>,
    ) -> impl Future<Output = bool> + Send {
        (**self).notify(api_key, device, previous, new)
    }
}
