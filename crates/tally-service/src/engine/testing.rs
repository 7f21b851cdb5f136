//! Shared fixtures for engine tests.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use tally_core::{
    ClientId, CollectionMetadata, CorrelationId, Decimal, EventId, MetricCatalog,
    MetricDefinition, MetricKey, MetricUnit, ProviderId, TenantId, UsageEvent, VendorCostData,
};

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn march_10() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

pub fn catalog() -> MetricCatalog {
    let mut catalog = MetricCatalog::new();
    catalog.register(
        &ProviderId::new("retell").unwrap(),
        vec![MetricDefinition::new(
            MetricKey::new("retell.call_minutes").unwrap(),
            MetricUnit::Minute,
            "Call minutes",
        )],
    );
    catalog
}

/// A valid retell event for t1/c1 priced at 0.05 per minute.
pub fn retell_event(resource_id: &str, minutes: &str) -> UsageEvent {
    let quantity = dec(minutes);
    let collected_at = Utc.with_ymd_and_hms(2026, 3, 31, 23, 0, 0).unwrap();
    UsageEvent {
        event_id: EventId::generate(),
        provider: ProviderId::new("retell").unwrap(),
        event_type: "phone_call".into(),
        metric_key: MetricKey::new("retell.call_minutes").unwrap(),
        unit: MetricUnit::Minute,
        quantity,
        tenant_id: TenantId::new("t1").unwrap(),
        client_id: ClientId::new("c1").unwrap(),
        agent_id: None,
        resource_id: Some(resource_id.to_string()),
        event_timestamp: march_10(),
        vendor_cost_data: VendorCostData::from_unit_cost(
            dec("0.05"),
            quantity,
            "USD",
            collected_at,
        ),
        collection_metadata: CollectionMetadata {
            collected_at,
            collector_version: "retell/test".into(),
            correlation_id: CorrelationId::new("corr-1").unwrap(),
            retry_count: 0,
            source_pagination: None,
        },
        tags: BTreeMap::new(),
        provider_data: None,
    }
}

/// Store whose event inserts always fail.
#[derive(Default)]
pub struct FailingInserts(pub tally_store::MemoryStore);

impl tally_store::Store for FailingInserts {
    fn insert_events(&self, _events: &[UsageEvent]) -> tally_store::Result<tally_store::InsertOutcome> {
        Err(tally_store::StoreError::Database("disk full".into()))
    }

    fn contains_event(&self, key: &tally_core::IdempotencyKey) -> tally_store::Result<bool> {
        self.0.contains_event(key)
    }

    fn events_in_window(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &tally_core::CycleWindow,
    ) -> tally_store::Result<Vec<UsageEvent>> {
        self.0.events_in_window(tenant_id, client_id, window)
    }

    fn put_quarantined(&self, events: &[tally_core::QuarantinedEvent]) -> tally_store::Result<()> {
        self.0.put_quarantined(events)
    }

    fn quarantined_in_window(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &tally_core::CycleWindow,
    ) -> tally_store::Result<Vec<tally_core::QuarantinedEvent>> {
        self.0.quarantined_in_window(tenant_id, client_id, window)
    }

    fn put_aggregate(&self, aggregate: &tally_core::CycleAggregate) -> tally_store::Result<()> {
        self.0.put_aggregate(aggregate)
    }

    fn aggregates_for_cycle(
        &self,
        tenant_id: &TenantId,
        client_id: Option<&ClientId>,
        window: &tally_core::CycleWindow,
    ) -> tally_store::Result<Vec<tally_core::CycleAggregate>> {
        self.0.aggregates_for_cycle(tenant_id, client_id, window)
    }

    fn aggregate_history(
        &self,
        group: &tally_core::GroupKey,
        before: DateTime<Utc>,
        limit: usize,
    ) -> tally_store::Result<Vec<tally_core::CycleAggregate>> {
        self.0.aggregate_history(group, before, limit)
    }

    fn put_run(&self, run: &tally_core::CollectionRun) -> tally_store::Result<()> {
        self.0.put_run(run)
    }

    fn get_run(
        &self,
        run_id: &tally_core::RunId,
    ) -> tally_store::Result<Option<tally_core::CollectionRun>> {
        self.0.get_run(run_id)
    }

    fn runs_for_correlation(
        &self,
        correlation_id: &CorrelationId,
    ) -> tally_store::Result<Vec<tally_core::CollectionRun>> {
        self.0.runs_for_correlation(correlation_id)
    }
}
