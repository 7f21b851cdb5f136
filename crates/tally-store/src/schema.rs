//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Canonical usage events, keyed by idempotency key.
    pub const EVENTS: &str = "events";

    /// Index: events by time, keyed by `tenant \0 timestamp idempotency_key`.
    /// Value is empty (index only).
    pub const EVENTS_BY_TIME: &str = "events_by_time";

    /// Quarantined events, keyed by `tenant \0 quarantine_id`.
    pub const QUARANTINE: &str = "quarantine";

    /// Cycle aggregates, keyed by scope key.
    pub const AGGREGATES: &str = "aggregates";

    /// Collection runs, keyed by `run_id` (ULID).
    pub const RUNS: &str = "runs";

    /// Index: runs by correlation ID, keyed by `correlation_id \0 run_id`.
    /// Value is empty (index only).
    pub const RUNS_BY_CORRELATION: &str = "runs_by_correlation";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::EVENTS,
        cf::EVENTS_BY_TIME,
        cf::QUARANTINE,
        cf::AGGREGATES,
        cf::RUNS,
        cf::RUNS_BY_CORRELATION,
    ]
}
