//! API key — credential of a third-party integrator.
//!
//! The token is both the secret and the storage key. A key may carry a
//! webhook URL, in which case it receives state deltas of every device it is
//! paired with.

use serde::{Deserialize, Serialize};

use crate::error::{HomeSimError, ValidationError};
use crate::id::ApiKeyToken;
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key: ApiKeyToken,
    pub name: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub last_used: Option<Timestamp>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_active() -> bool {
    true
}

impl ApiKey {
    /// A new, active key that has never been used.
    #[must_use]
    pub fn new(key: ApiKeyToken, name: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            key,
            name: name.into(),
            created_at,
            last_used: None,
            is_active: true,
            webhook_url: None,
        }
    }

    #[must_use]
    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    /// Webhook target, if this key subscribes to notifications.
    #[must_use]
    pub fn webhook_target(&self) -> Option<&str> {
        self.webhook_url.as_deref().filter(|url| !url.is_empty())
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HomeSimError::Validation`] when `name` is empty or the
    /// webhook URL is not an absolute `http`/`https` URL.
    pub fn validate(&self) -> Result<(), HomeSimError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if let Some(raw) = self.webhook_target() {
            let parsed = url::Url::parse(raw)
                .map_err(|_| ValidationError::InvalidWebhookUrl(raw.to_string()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ValidationError::InvalidWebhookUrl(raw.to_string()).into());
            }
        }
        Ok(())
    }
}
