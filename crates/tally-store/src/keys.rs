//! Key encoding utilities for `RocksDB`.
//!
//! String components are separated by `\0`, which identifiers cannot contain.
//! Timestamps are encoded as 8 big-endian bytes with the sign bit flipped so that
//! byte order matches time order.

use chrono::{DateTime, Utc};
use tally_core::{CorrelationId, CycleWindow, GroupKey, IdempotencyKey, QuarantineId, RunId, TenantId};

const SEP: u8 = 0;
const TIMESTAMP_LEN: usize = 8;
const ULID_LEN: usize = 16;

/// Encode a timestamp as order-preserving bytes (microsecond precision).
#[must_use]
pub fn timestamp_bytes(timestamp: DateTime<Utc>) -> [u8; TIMESTAMP_LEN] {
    (timestamp.timestamp_micros() ^ i64::MIN).to_be_bytes()
}

fn push_str(key: &mut Vec<u8>, value: &str) {
    key.extend_from_slice(value.as_bytes());
    key.push(SEP);
}

/// Create an event key from its idempotency key.
#[must_use]
pub fn event_key(key: &IdempotencyKey) -> Vec<u8> {
    key.as_str().as_bytes().to_vec()
}

/// Create a prefix for iterating a tenant's entries.
#[must_use]
pub fn tenant_prefix(tenant_id: &TenantId) -> Vec<u8> {
    let mut key = Vec::with_capacity(tenant_id.as_str().len() + 1);
    push_str(&mut key, tenant_id.as_str());
    key
}

/// Create the seek position of a tenant's events at a point in time.
#[must_use]
pub fn event_time_seek(tenant_id: &TenantId, timestamp: DateTime<Utc>) -> Vec<u8> {
    let mut key = tenant_prefix(tenant_id);
    key.extend_from_slice(&timestamp_bytes(timestamp));
    key
}

/// Create an events-by-time index key.
///
/// Format: `tenant_id \0 timestamp (8 bytes) || idempotency_key`
#[must_use]
pub fn event_time_key(
    tenant_id: &TenantId,
    timestamp: DateTime<Utc>,
    key: &IdempotencyKey,
) -> Vec<u8> {
    let mut index = event_time_seek(tenant_id, timestamp);
    index.extend_from_slice(key.as_str().as_bytes());
    index
}

/// Split an events-by-time index key into its timestamp bytes and event key.
#[must_use]
pub fn split_event_time_key<'a>(
    tenant_id: &TenantId,
    index: &'a [u8],
) -> Option<(&'a [u8], &'a [u8])> {
    let start = tenant_id.as_str().len() + 1;
    let timestamp = index.get(start..start + TIMESTAMP_LEN)?;
    let key = index.get(start + TIMESTAMP_LEN..)?;
    Some((timestamp, key))
}

/// Create a quarantine key.
///
/// Unattributed events are stored under an empty tenant.
#[must_use]
pub fn quarantine_key(tenant_id: Option<&TenantId>, id: &QuarantineId) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    push_str(&mut key, tenant_id.map_or("", TenantId::as_str));
    key.extend_from_slice(&id.to_bytes());
    key
}

/// Create a prefix for iterating one group's aggregates across cycles.
#[must_use]
pub fn aggregate_group_prefix(group: &GroupKey) -> Vec<u8> {
    let mut key = Vec::with_capacity(128);
    push_str(&mut key, group.tenant_id.as_str());
    push_str(&mut key, group.client_id.as_str());
    push_str(&mut key, group.agent_id.as_ref().map_or("", |a| a.as_str()));
    push_str(&mut key, group.provider.as_str());
    push_str(&mut key, group.metric_key.as_str());
    key
}

/// Create an aggregate scope key.
///
/// Format: `group prefix || cycle_start (8 bytes) || cycle_end (8 bytes)`
#[must_use]
pub fn aggregate_key(group: &GroupKey, window: &CycleWindow) -> Vec<u8> {
    let mut key = aggregate_group_prefix(group);
    key.extend_from_slice(&timestamp_bytes(window.start));
    key.extend_from_slice(&timestamp_bytes(window.end));
    key
}

/// Create a run key from a run ID.
#[must_use]
pub fn run_key(run_id: &RunId) -> Vec<u8> {
    run_id.to_bytes().to_vec()
}

/// Create a prefix for iterating the runs of a correlation ID.
#[must_use]
pub fn correlation_prefix(correlation_id: &CorrelationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(correlation_id.as_str().len() + 1);
    push_str(&mut key, correlation_id.as_str());
    key
}

/// Create a correlation-run index key.
///
/// Format: `correlation_id \0 run_id (16 bytes)`
///
/// Since ULIDs are time-ordered, attempts of a correlation ID sort oldest first.
#[must_use]
pub fn correlation_run_key(correlation_id: &CorrelationId, run_id: &RunId) -> Vec<u8> {
    let mut key = correlation_prefix(correlation_id);
    key.extend_from_slice(&run_id.to_bytes());
    key
}

/// Extract the run ID from a correlation-run index key.
#[must_use]
pub fn extract_run_id_from_correlation_key(key: &[u8]) -> Option<RunId> {
    let start = key.len().checked_sub(ULID_LEN)?;
    let bytes: [u8; ULID_LEN] = key.get(start..)?.try_into().ok()?;
    Some(RunId::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_bytes_preserve_order() {
        let before_epoch = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap();
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert!(timestamp_bytes(before_epoch) < timestamp_bytes(epoch));
        assert!(timestamp_bytes(epoch) < timestamp_bytes(later));
    }

    #[test]
    fn event_time_key_splits_back() {
        let tenant = TenantId::new("t1").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let idem: IdempotencyKey =
            serde_json::from_str("\"retell:call_1:retell.call_minutes\"").unwrap();
        let index = event_time_key(&tenant, at, &idem);

        assert!(index.starts_with(&tenant_prefix(&tenant)));
        let (ts, key) = split_event_time_key(&tenant, &index).unwrap();
        assert_eq!(ts, timestamp_bytes(at));
        assert_eq!(key, idem.as_str().as_bytes());
    }

    #[test]
    fn tenant_prefixes_do_not_overlap() {
        let short = tenant_prefix(&TenantId::new("t1").unwrap());
        let long = tenant_prefix(&TenantId::new("t10").unwrap());
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn extract_run_id_roundtrip() {
        let correlation = CorrelationId::new("corr-1").unwrap();
        let run_id = RunId::generate();
        let key = correlation_run_key(&correlation, &run_id);
        assert_eq!(key.len(), "corr-1".len() + 1 + 16);
        assert_eq!(extract_run_id_from_correlation_key(&key), Some(run_id));
        assert_eq!(extract_run_id_from_correlation_key(&[1, 2]), None);
    }
}
