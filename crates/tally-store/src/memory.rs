//! In-memory storage implementation.
//!
//! Semantics match `RocksStore`; data lives only as long as the process.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tally_core::{
    ClientId, CollectionRun, CorrelationId, CycleAggregate, CycleWindow, GroupKey,
    IdempotencyKey, QuarantinedEvent, RunId, TenantId, UsageEvent,
};

use crate::error::{Result, StoreError};
use crate::{quarantine_timestamp, InsertOutcome, Store};

#[derive(Default)]
struct Inner {
    events: BTreeMap<IdempotencyKey, UsageEvent>,
    quarantine: Vec<QuarantinedEvent>,
    aggregates: BTreeMap<(GroupKey, CycleWindow), CycleAggregate>,
    runs: BTreeMap<RunId, CollectionRun>,
}

/// Process-local storage implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

fn in_scope(
    tenant: &TenantId,
    client: Option<&ClientId>,
    event_tenant: Option<&TenantId>,
    event_client: Option<&ClientId>,
) -> bool {
    event_tenant == Some(tenant) && client.map_or(true, |c| event_client == Some(c))
}

impl Store for MemoryStore {
    fn insert_events(&self, events: &[UsageEvent]) -> Result<InsertOutcome> {
        let mut inner = self.write()?;
        let mut outcome = InsertOutcome::default();
        for event in events {
            let key = event.idempotency_key();
            if inner.events.contains_key(&key) {
                outcome.duplicates += 1;
            } else {
                inner.events.insert(key, event.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    fn contains_event(&self, key: &IdempotencyKey) -> Result<bool> {
        Ok(self.read()?.events.contains_key(key))
    }

    fn events_in_window(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &CycleWindow,
    ) -> Result<Vec<UsageEvent>> {
        let inner = self.read()?;
        let mut events: Vec<UsageEvent> = inner
            .events
            .values()
            .filter(|e| {
                in_scope(tenant_id, client_id, Some(&e.tenant_id), Some(&e.client_id))
                    && window.contains(e.event_timestamp)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.event_timestamp);
        Ok(events)
    }

    fn put_quarantined(&self, events: &[QuarantinedEvent]) -> Result<()> {
        self.write()?.quarantine.extend_from_slice(events);
        Ok(())
    }

    fn quarantined_in_window(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &CycleWindow,
    ) -> Result<Vec<QuarantinedEvent>> {
        let inner = self.read()?;
        Ok(inner
            .quarantine
            .iter()
            .filter(|q| {
                in_scope(
                    tenant_id,
                    client_id,
                    q.tenant_id.as_ref(),
                    q.client_id.as_ref(),
                ) && window.contains(quarantine_timestamp(q))
            })
            .cloned()
            .collect())
    }

    fn put_aggregate(&self, aggregate: &CycleAggregate) -> Result<()> {
        self.write()?.aggregates.insert(
            (aggregate.group.clone(), aggregate.window()),
            aggregate.clone(),
        );
        Ok(())
    }

    fn aggregates_for_cycle(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &CycleWindow,
    ) -> Result<Vec<CycleAggregate>> {
        let inner = self.read()?;
        Ok(inner
            .aggregates
            .iter()
            .filter(|((group, cycle), _)| {
                cycle == window
                    && in_scope(
                        tenant_id,
                        client_id,
                        Some(&group.tenant_id),
                        Some(&group.client_id),
                    )
            })
            .map(|(_, aggregate)| aggregate.clone())
            .collect())
    }

    fn aggregate_history(
        &self,
        group: &GroupKey,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CycleAggregate>> {
        let inner = self.read()?;
        Ok(inner
            .aggregates
            .iter()
            .rev()
            .filter(|((g, cycle), _)| g == group && cycle.end <= before)
            .take(limit)
            .map(|(_, aggregate)| aggregate.clone())
            .collect())
    }

    fn put_run(&self, run: &CollectionRun) -> Result<()> {
        self.write()?.runs.insert(run.run_id, run.clone());
        Ok(())
    }

    fn get_run(&self, run_id: &RunId) -> Result<Option<CollectionRun>> {
        Ok(self.read()?.runs.get(run_id).cloned())
    }

    fn runs_for_correlation(&self, correlation_id: &CorrelationId) -> Result<Vec<CollectionRun>> {
        let inner = self.read()?;
        let mut runs: Vec<CollectionRun> = inner
            .runs
            .values()
            .filter(|r| &r.correlation_id == correlation_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.attempt);
        Ok(runs)
    }
}
