//! Typed identifiers.
//!
//! Device ids are UUIDs. API-key ids are the secret token itself, and action
//! ids are derived from the action name and its creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

macro_rules! define_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Access the inner UUID.
            #[must_use]
            pub fn as_uuid(self) -> uuid::Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a [`Device`](crate::device::Device).
    DeviceId
);

/// Secret API-key token; doubles as the key's storage identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeyToken(String);

impl ApiKeyToken {
    /// Number of random bytes a token is generated from.
    pub const BYTES: usize = 32;

    /// Hex-encode raw random bytes into a token.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::BYTES]) -> Self {
        use fmt::Write;

        let mut hex = String::with_capacity(Self::BYTES * 2);
        for byte in bytes {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token has the shape of an issued key: exactly
    /// `2 * BYTES` lowercase hex digits.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == Self::BYTES * 2
            && self
                .0
                .bytes()
                .all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'))
    }
}

/// A string that cannot be an issued API key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed api key token")]
pub struct InvalidApiKeyToken;

impl FromStr for ApiKeyToken {
    type Err = InvalidApiKeyToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = Self(s.to_string());
        if token.is_well_formed() {
            Ok(token)
        } else {
            Err(InvalidApiKeyToken)
        }
    }
}

impl From<String> for ApiKeyToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ApiKeyToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ApiKeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Tokens are secrets: never print them in full through `{:?}`.
impl fmt::Debug for ApiKeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "ApiKeyToken({prefix}…)")
    }
}

/// Identifier of an [`Action`](crate::action::Action) within a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Derive the id from the action name and its creation time.
    #[must_use]
    pub fn generate(name: &str, created_at: Timestamp) -> Self {
        Self(format!("{name}_{}", created_at.timestamp_millis()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ActionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
