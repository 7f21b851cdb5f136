//! Identifier types for tally.
//!
//! Two families of identifiers live here:
//!
//! - **Generated** identifiers (`EventId`, `RunId`, `QuarantineId`) are ULIDs, so they sort
//!   by creation time and can be used directly as ordered storage keys.
//! - **External** identifiers (`TenantId`, `ClientId`, `AgentId`, `ProviderId`,
//!   `CorrelationId`, `MetricKey`) are owned by other systems and carried as validated
//!   strings.
//!
//! # Macro-based ID Types
//!
//! The `ulid_id_type!` and `string_id_type!` macros keep serialization, parsing and
//! display consistent across every identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Define a ULID-based identifier type with standard trait implementations.
///
/// The generated newtype implements `Clone`, `Copy`, `Eq`, `Ord`, `Hash`,
/// string (de)serialization, `FromStr`, `Display` and `Debug`, plus byte conversions
/// used for storage keys.
macro_rules! ulid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Create an identifier from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Generate a new identifier with the current timestamp.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Return the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> &Ulid {
                &self.0
            }

            /// Return the bytes of the ULID (16 bytes).
            #[must_use]
            pub fn to_bytes(&self) -> [u8; 16] {
                self.0.to_bytes()
            }

            /// Create an identifier from its 16-byte representation.
            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Ulid::from_bytes(bytes))
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
                Ok(Self(ulid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

/// Define a validated string identifier owned by an external system.
///
/// Values must be non-empty, at most 255 bytes and free of control characters.
macro_rules! string_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier, validating its contents.
            ///
            /// # Errors
            ///
            /// Returns an error if the value is empty, too long or contains control
            /// characters.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                validate_external(&value)?;
                Ok(Self(value))
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

ulid_id_type!(EventId, "A canonical usage event identifier, generated at normalization time.");
ulid_id_type!(RunId, "A collection run identifier.\n\nEach attempt of a collection gets its own run ID; attempts share a correlation ID.");
ulid_id_type!(QuarantineId, "Identifier of a quarantined (invalid) event record.");

string_id_type!(TenantId, "A tenant identifier owned by the tenant directory service.");
string_id_type!(ClientId, "A client identifier, scoped to a tenant.");
string_id_type!(AgentId, "An internal agent identifier.\n\nProvider-side agent identifiers are mapped to these through a `ClientAgentMapping`.");
string_id_type!(CorrelationId, "A correlation identifier supplied by the caller and threaded through every call of a run.");

const MAX_EXTERNAL_ID_LEN: usize = 255;

fn validate_external(value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    if value.len() > MAX_EXTERNAL_ID_LEN {
        return Err(IdError::TooLong {
            max: MAX_EXTERNAL_ID_LEN,
        });
    }
    if value.chars().any(char::is_control) {
        return Err(IdError::InvalidCharacter);
    }
    Ok(())
}

/// A provider identifier (`retell`, `twilio`, `openrouter`, ...).
///
/// Provider IDs are lowercase ASCII letters, digits, `_` and `-`. They prefix every
/// metric key the provider emits.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    /// Create a provider ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty or not lowercase ASCII.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if !value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
        {
            return Err(IdError::InvalidCharacter);
        }
        Ok(Self(value))
    }

    /// Borrow the provider ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ProviderId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderId({})", self.0)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProviderId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.0
    }
}

/// A canonical metric key of the form `<provider>.<metric>`, e.g. `retell.call_minutes`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricKey(String);

impl MetricKey {
    /// Create a metric key.
    ///
    /// # Errors
    ///
    /// Returns an error unless the value is `<provider>.<metric>` with a valid provider
    /// prefix and a non-empty lowercase metric name.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        let (provider, metric) = value.split_once('.').ok_or(IdError::InvalidMetricKey)?;
        ProviderId::new(provider).map_err(|_| IdError::InvalidMetricKey)?;
        if metric.is_empty()
            || !metric
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'.')
        {
            return Err(IdError::InvalidMetricKey);
        }
        Ok(Self(value))
    }

    /// Build a metric key from a provider and a metric name.
    ///
    /// # Errors
    ///
    /// Returns an error if the metric name is invalid.
    pub fn for_provider(provider: &ProviderId, metric: &str) -> Result<Self, IdError> {
        Self::new(format!("{provider}.{metric}"))
    }

    /// The provider prefix of this key.
    #[must_use]
    pub fn provider_prefix(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(p, _)| p)
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MetricKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Debug for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetricKey({})", self.0)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MetricKey {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MetricKey> for String {
    fn from(key: MetricKey) -> Self {
        key.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,

    /// The input is empty.
    #[error("identifier must not be empty")]
    Empty,

    /// The input is longer than allowed.
    #[error("identifier longer than {max} bytes")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },

    /// The input contains a character that is not allowed.
    #[error("identifier contains an invalid character")]
    InvalidCharacter,

    /// The input is not a `<provider>.<metric>` key.
    #[error("metric key must look like `<provider>.<metric>`")]
    InvalidMetricKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_roundtrip() {
        let id = EventId::generate();
        let parsed = EventId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn run_id_bytes_roundtrip() {
        let id = RunId::generate();
        assert_eq!(RunId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn tenant_id_rejects_empty_and_control_chars() {
        assert_eq!(TenantId::new(""), Err(IdError::Empty));
        assert_eq!(TenantId::new("t\n1"), Err(IdError::InvalidCharacter));
        assert!(TenantId::new("tenant-1").is_ok());
    }

    #[test]
    fn tenant_id_serde_json() {
        let id = TenantId::new("t1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"t1\"");
        let parsed: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
        assert!(serde_json::from_str::<TenantId>("\"\"").is_err());
    }

    #[test]
    fn provider_id_is_lowercase_only() {
        assert!(ProviderId::new("retell").is_ok());
        assert!(ProviderId::new("open-router_2").is_ok());
        assert_eq!(ProviderId::new("Retell"), Err(IdError::InvalidCharacter));
        assert_eq!(ProviderId::new("re tell"), Err(IdError::InvalidCharacter));
    }

    #[test]
    fn metric_key_requires_provider_prefix() {
        let key = MetricKey::new("retell.call_minutes").unwrap();
        assert_eq!(key.provider_prefix(), "retell");
        assert_eq!(MetricKey::new("call_minutes"), Err(IdError::InvalidMetricKey));
        assert_eq!(MetricKey::new("retell."), Err(IdError::InvalidMetricKey));
        assert_eq!(MetricKey::new("Retell.x"), Err(IdError::InvalidMetricKey));
    }

    #[test]
    fn metric_key_for_provider() {
        let provider = ProviderId::new("openrouter").unwrap();
        let key = MetricKey::for_provider(&provider, "input_tokens").unwrap();
        assert_eq!(key.as_str(), "openrouter.input_tokens");
    }
}
