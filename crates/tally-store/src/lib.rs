//! Storage layer for tally.
//!
//! This crate persists canonical usage events, quarantined events, cycle aggregates
//! and collection runs behind the [`Store`] trait. Two backends are provided:
//!
//! - [`MemoryStore`]: process-local maps, used by tests and ephemeral deployments
//! - `RocksStore` (feature `rocksdb-backend`): `RocksDB` with column families and CBOR
//!   values
//!
//! # Architecture
//!
//! The `RocksDB` backend uses the following column families:
//!
//! - `events`: canonical events, keyed by idempotency key
//! - `events_by_time`: index for window scans per tenant
//! - `quarantine`: events rejected by validation
//! - `aggregates`: cycle aggregates, keyed by scope key
//! - `runs` / `runs_by_correlation`: collection runs and their attempt index
//!
//! # Example
//!
#![cfg_attr(feature = "rocksdb-backend", doc = "```no_run")]
#![cfg_attr(not(feature = "rocksdb-backend"), doc = "```ignore")]
//! use tally_store::{RocksStore, Store};
//! use tally_core::CorrelationId;
//!
//! let store = RocksStore::open("/tmp/tally-db").unwrap();
//! let correlation_id = CorrelationId::new("nightly-2026-03-01").unwrap();
//! let latest = store.latest_run(&correlation_id).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use tally_core::{
    ClientId, CollectionRun, CorrelationId, CycleAggregate, CycleWindow, GroupKey,
    IdempotencyKey, QuarantinedEvent, RunId, TenantId, UsageEvent,
};

/// Result of a bulk event insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Events written.
    pub inserted: usize,
    /// Events ignored because their idempotency key was already stored.
    pub duplicates: usize,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Event Operations
    // =========================================================================

    /// Insert events, ignoring any whose idempotency key is already stored.
    ///
    /// The batch is written atomically. Repeated keys within the batch count as
    /// duplicates after the first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; nothing is written then.
    fn insert_events(&self, events: &[UsageEvent]) -> Result<InsertOutcome>;

    /// Check if an event with this idempotency key is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn contains_event(&self, key: &IdempotencyKey) -> Result<bool>;

    /// List a tenant's events with `eventTimestamp` inside the window, optionally
    /// restricted to one client. Ordered by timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn events_in_window(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &CycleWindow,
    ) -> Result<Vec<UsageEvent>>;

    // =========================================================================
    // Quarantine Operations
    // =========================================================================

    /// Record events rejected by validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_quarantined(&self, events: &[QuarantinedEvent]) -> Result<()>;

    /// List a tenant's quarantined events whose timestamp falls inside the window.
    ///
    /// The vendor timestamp is used when known, the quarantine time otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn quarantined_in_window(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &CycleWindow,
    ) -> Result<Vec<QuarantinedEvent>>;

    // =========================================================================
    // Aggregate Operations
    // =========================================================================

    /// Insert or replace the aggregate for its scope key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_aggregate(&self, aggregate: &CycleAggregate) -> Result<()>;

    /// List a tenant's aggregates for exactly this cycle, optionally restricted to
    /// one client.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn aggregates_for_cycle(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &CycleWindow,
    ) -> Result<Vec<CycleAggregate>>;

    /// List up to `limit` aggregates of a group whose cycle ended at or before
    /// `before`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn aggregate_history(
        &self,
        group: &GroupKey,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CycleAggregate>>;

    // =========================================================================
    // Run Operations
    // =========================================================================

    /// Insert or update a collection run.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_run(&self, run: &CollectionRun) -> Result<()>;

    /// Get a run by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_run(&self, run_id: &RunId) -> Result<Option<CollectionRun>>;

    /// List every attempt of a correlation ID, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn runs_for_correlation(&self, correlation_id: &CorrelationId) -> Result<Vec<CollectionRun>>;

    /// Get the latest attempt of a correlation ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn latest_run(&self, correlation_id: &CorrelationId) -> Result<Option<CollectionRun>> {
        Ok(self.runs_for_correlation(correlation_id)?.pop())
    }
}

/// Timestamp a quarantined event is windowed by.
pub(crate) fn quarantine_timestamp(event: &QuarantinedEvent) -> DateTime<Utc> {
    event.event_timestamp.unwrap_or(event.quarantined_at)
}
