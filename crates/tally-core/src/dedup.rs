//! Idempotency keys for usage events.
//!
//! The key is `provider:resourceId:metricKey` when the vendor supplies a resource
//! identifier. Otherwise it is a SHA-256 content hash over
//! `(provider, tenantId, clientId, metricKey, eventTimestamp, quantity)`.

use std::fmt;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::UsageEvent;

/// Prefix of content-hash keys, which cannot collide with provider IDs.
const CONTENT_HASH_PREFIX: &str = "sha256:";

/// Deterministic identifier used to detect duplicate usage records.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derive the key for an event.
    #[must_use]
    pub fn for_event(event: &UsageEvent) -> Self {
        match event.resource_id.as_deref() {
            Some(resource_id) if !resource_id.is_empty() => Self(format!(
                "{}:{}:{}",
                event.provider, resource_id, event.metric_key
            )),
            _ => Self::content_hash(event),
        }
    }

    fn content_hash(event: &UsageEvent) -> Self {
        let mut hasher = Sha256::new();
        for part in [
            event.provider.as_str(),
            event.tenant_id.as_str(),
            event.client_id.as_str(),
            event.metric_key.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(
            event
                .event_timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        hasher.update([0u8]);
        // 5.50 and 5.5 are the same quantity
        hasher.update(event.quantity.normalize().to_string().as_bytes());

        Self(format!(
            "{CONTENT_HASH_PREFIX}{}",
            hex::encode(hasher.finalize())
        ))
    }

    /// Whether this key was derived from event content rather than a resource ID.
    #[must_use]
    pub fn is_content_hash(&self) -> bool {
        self.0.starts_with(CONTENT_HASH_PREFIX)
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdempotencyKey({})", self.0)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl UsageEvent {
    /// The idempotency key of this event.
    #[must_use]
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::for_event(self)
    }
}
