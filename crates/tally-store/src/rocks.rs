//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tally_core::{
    ClientId, CollectionRun, CorrelationId, CycleAggregate, CycleWindow, GroupKey,
    IdempotencyKey, QuarantinedEvent, RunId, TenantId, UsageEvent,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{quarantine_timestamp, InsertOutcome, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Serializes the exists-check and write of `insert_events`.
    insert_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            insert_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Collect every `(key, value)` pair under a prefix, in key order.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Event Operations
    // =========================================================================

    fn insert_events(&self, events: &[UsageEvent]) -> Result<InsertOutcome> {
        let _guard = self
            .insert_lock
            .lock()
            .map_err(|_| StoreError::Database("insert lock poisoned".into()))?;

        let cf_events = self.cf(cf::EVENTS)?;
        let cf_by_time = self.cf(cf::EVENTS_BY_TIME)?;

        let mut outcome = InsertOutcome::default();
        let mut batch = WriteBatch::default();
        let mut in_batch = HashSet::new();

        for event in events {
            let idem = event.idempotency_key();
            if !in_batch.insert(idem.clone()) || self.contains_event(&idem)? {
                outcome.duplicates += 1;
                continue;
            }

            let value = Self::serialize(event)?;
            batch.put_cf(&cf_events, keys::event_key(&idem), &value);
            batch.put_cf(
                &cf_by_time,
                keys::event_time_key(&event.tenant_id, event.event_timestamp, &idem),
                [],
            );
            outcome.inserted += 1;
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(outcome)
    }

    fn contains_event(&self, key: &IdempotencyKey) -> Result<bool> {
        let cf = self.cf(cf::EVENTS)?;
        let exists = self
            .db
            .get_pinned_cf(&cf, keys::event_key(key))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        Ok(exists)
    }

    fn events_in_window(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &CycleWindow,
    ) -> Result<Vec<UsageEvent>> {
        let cf_by_time = self.cf(cf::EVENTS_BY_TIME)?;
        let prefix = keys::tenant_prefix(tenant_id);
        let seek = keys::event_time_seek(tenant_id, window.start);
        let end = keys::timestamp_bytes(window.end);

        let iter = self
            .db
            .iterator_cf(&cf_by_time, IteratorMode::From(&seek, Direction::Forward));

        let mut events = Vec::new();
        for item in iter {
            let (index, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !index.starts_with(&prefix) {
                break;
            }
            let (timestamp, key) = keys::split_event_time_key(tenant_id, &index)
                .ok_or(StoreError::CorruptKey {
                    cf: cf::EVENTS_BY_TIME,
                })?;
            // Microsecond keys can tie with the exclusive end; the exact check is below.
            if timestamp > end.as_slice() {
                break;
            }

            let Some(event) = self.get::<UsageEvent>(cf::EVENTS, key)? else {
                tracing::warn!(tenant_id = %tenant_id, "dangling event index entry");
                continue;
            };
            if window.contains(event.event_timestamp)
                && client_id.map_or(true, |c| &event.client_id == c)
            {
                events.push(event);
            }
        }

        Ok(events)
    }

    // =========================================================================
    // Quarantine Operations
    // =========================================================================

    fn put_quarantined(&self, events: &[QuarantinedEvent]) -> Result<()> {
        let cf = self.cf(cf::QUARANTINE)?;
        let mut batch = WriteBatch::default();
        for event in events {
            let key = keys::quarantine_key(event.tenant_id.as_ref(), &event.quarantine_id);
            batch.put_cf(&cf, key, Self::serialize(event)?);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn quarantined_in_window(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &CycleWindow,
    ) -> Result<Vec<QuarantinedEvent>> {
        let mut events = Vec::new();
        for (_, value) in self.scan_prefix(cf::QUARANTINE, &keys::tenant_prefix(tenant_id))? {
            let event: QuarantinedEvent = Self::deserialize(&value)?;
            if window.contains(quarantine_timestamp(&event))
                && client_id.map_or(true, |c| event.client_id.as_ref() == Some(c))
            {
                events.push(event);
            }
        }
        Ok(events)
    }

    // =========================================================================
    // Aggregate Operations
    // =========================================================================

    fn put_aggregate(&self, aggregate: &CycleAggregate) -> Result<()> {
        let cf = self.cf(cf::AGGREGATES)?;
        let key = keys::aggregate_key(&aggregate.group, &aggregate.window());
        let value = Self::serialize(aggregate)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn aggregates_for_cycle(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &CycleWindow,
    ) -> Result<Vec<CycleAggregate>> {
        let mut aggregates = Vec::new();
        for (_, value) in self.scan_prefix(cf::AGGREGATES, &keys::tenant_prefix(tenant_id))? {
            let aggregate: CycleAggregate = Self::deserialize(&value)?;
            if aggregate.window() == *window
                && client_id.map_or(true, |c| &aggregate.group.client_id == c)
            {
                aggregates.push(aggregate);
            }
        }
        Ok(aggregates)
    }

    fn aggregate_history(
        &self,
        group: &GroupKey,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CycleAggregate>> {
        let entries = self.scan_prefix(cf::AGGREGATES, &keys::aggregate_group_prefix(group))?;

        let mut history = Vec::new();
        // Keys sort by cycle start, so walk backwards for newest first.
        for (_, value) in entries.into_iter().rev() {
            if history.len() >= limit {
                break;
            }
            let aggregate: CycleAggregate = Self::deserialize(&value)?;
            if aggregate.cycle_end <= before {
                history.push(aggregate);
            }
        }
        Ok(history)
    }

    // =========================================================================
    // Run Operations
    // =========================================================================

    fn put_run(&self, run: &CollectionRun) -> Result<()> {
        let cf_runs = self.cf(cf::RUNS)?;
        let cf_by_correlation = self.cf(cf::RUNS_BY_CORRELATION)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_runs, keys::run_key(&run.run_id), Self::serialize(run)?);
        batch.put_cf(
            &cf_by_correlation,
            keys::correlation_run_key(&run.correlation_id, &run.run_id),
            [],
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_run(&self, run_id: &RunId) -> Result<Option<CollectionRun>> {
        self.get(cf::RUNS, &keys::run_key(run_id))
    }

    fn runs_for_correlation(&self, correlation_id: &CorrelationId) -> Result<Vec<CollectionRun>> {
        let prefix = keys::correlation_prefix(correlation_id);
        let mut runs = Vec::new();
        for (key, _) in self.scan_prefix(cf::RUNS_BY_CORRELATION, &prefix)? {
            let run_id = keys::extract_run_id_from_correlation_key(&key).ok_or(
                StoreError::CorruptKey {
                    cf: cf::RUNS_BY_CORRELATION,
                },
            )?;
            if let Some(run) = self.get_run(&run_id)? {
                runs.push(run);
            }
        }
        runs.sort_by_key(|r| r.attempt);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn reopen_keeps_runs() {
        let dir = TempDir::new().unwrap();
        let window = CycleWindow::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let run = CollectionRun::new(
            CorrelationId::new("corr-1").unwrap(),
            tally_core::ProviderId::new("retell").unwrap(),
            TenantId::new("t1").unwrap(),
            ClientId::new("c1").unwrap(),
            window,
        );

        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.put_run(&run).unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.get_run(&run.run_id).unwrap(), Some(run.clone()));
        assert_eq!(
            store.latest_run(&run.correlation_id).unwrap().map(|r| r.run_id),
            Some(run.run_id)
        );
    }

    #[test]
    fn empty_store_has_no_runs() {
        let (store, _dir) = create_test_store();
        let correlation = CorrelationId::new("nothing").unwrap();
        assert!(store.latest_run(&correlation).unwrap().is_none());
        assert!(store.runs_for_correlation(&correlation).unwrap().is_empty());
    }
}
