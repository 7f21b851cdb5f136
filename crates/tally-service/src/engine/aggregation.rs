//! Billing-cycle aggregation.
//!
//! Folds a cycle's persisted events into one [`CycleAggregate`] per
//! tenant/client/agent/provider/metric group. Aggregates are replaced wholesale on
//! every run, so re-running an unchanged cycle yields the same content.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_core::{
    ClientId, CoreError, CorrelationId, CycleAggregate, CycleWindow, GroupKey, TenantId, UsageEvent,
};
use tally_store::Store;

use super::audit::{AuditKind, AuditRecord, AuditSink};
use super::error::{EngineError, Result};
use super::quality::{self, GroupQuality};
use crate::config::QualityThresholds;

/// Scope of one aggregation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationRequest {
    /// Tenant to aggregate.
    pub tenant_id: TenantId,
    /// Client to aggregate; all of the tenant's clients when absent.
    #[serde(default)]
    pub client_id: Option<ClientId>,
    /// Start of the billing cycle (inclusive).
    pub cycle_start: DateTime<Utc>,
    /// End of the billing cycle (exclusive).
    pub cycle_end: DateTime<Utc>,
    /// Correlation ID carried into the audit record.
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

impl AggregationRequest {
    /// The billing cycle.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidWindow` unless the cycle starts before it ends.
    pub fn window(&self) -> std::result::Result<CycleWindow, CoreError> {
        CycleWindow::new(self.cycle_start, self.cycle_end)
    }
}

/// A group whose aggregate could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupFailure {
    /// The group.
    pub group: GroupKey,
    /// Why it failed.
    pub error: String,
}

/// Result of an aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationReport {
    /// Aggregates written, sorted by group.
    pub aggregates: Vec<CycleAggregate>,
    /// Events folded into the written aggregates.
    pub events_aggregated: u64,
    /// Groups left untouched because of an error.
    pub failed_groups: Vec<GroupFailure>,
    /// Wall time of the run.
    pub duration_ms: u64,
}

#[derive(Default)]
struct GroupInput {
    events: Vec<UsageEvent>,
    quarantined: u64,
}

/// Computes and stores cycle aggregates.
pub struct AggregationEngine {
    store: Arc<dyn Store>,
    thresholds: QualityThresholds,
    audit: Arc<dyn AuditSink>,
}

impl AggregationEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        thresholds: QualityThresholds,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            thresholds,
            audit,
        }
    }

    /// Aggregate every group of the scope over the cycle.
    ///
    /// A failing group is reported and skipped; the others are still written.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Core` for an invalid cycle and `EngineError::Store` if
    /// the cycle's events cannot be read.
    pub fn run(&self, request: &AggregationRequest) -> Result<AggregationReport> {
        let started = Instant::now();
        let window = request.window()?;
        let client = request.client_id.as_ref();

        let mut groups: BTreeMap<GroupKey, GroupInput> = BTreeMap::new();
        for event in self.store.events_in_window(&request.tenant_id, client, &window)? {
            groups.entry(GroupKey::of(&event)).or_default().events.push(event);
        }
        for quarantined in self
            .store
            .quarantined_in_window(&request.tenant_id, client, &window)?
        {
            if let Some(group) = quarantined.group_key() {
                groups.entry(group).or_default().quarantined += 1;
            }
        }

        let now = Utc::now();
        let mut report = AggregationReport {
            aggregates: Vec::with_capacity(groups.len()),
            events_aggregated: 0,
            failed_groups: Vec::new(),
            duration_ms: 0,
        };
        for (group, mut input) in groups {
            input.events.sort_by_cached_key(UsageEvent::idempotency_key);
            match self.aggregate_group(&group, window, &input, now) {
                Ok(aggregate) => {
                    report.events_aggregated += aggregate.event_count;
                    report.aggregates.push(aggregate);
                }
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %group.tenant_id,
                        client_id = %group.client_id,
                        provider = %group.provider,
                        metric_key = %group.metric_key,
                        error = %e,
                        "Skipping aggregate group"
                    );
                    report.failed_groups.push(GroupFailure {
                        group,
                        error: e.to_string(),
                    });
                }
            }
        }
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        self.audit.record(&AuditRecord {
            kind: AuditKind::Aggregation,
            correlation_id: request.correlation_id.clone(),
            provider: None,
            tenant_id: request.tenant_id.clone(),
            events_collected: 0,
            events_aggregated: report.events_aggregated,
            duration_ms: report.duration_ms,
            outcome: if report.failed_groups.is_empty() {
                "completed".into()
            } else {
                "partial".into()
            },
            recorded_at: Utc::now(),
        });
        Ok(report)
    }

    fn aggregate_group(
        &self,
        group: &GroupKey,
        window: CycleWindow,
        input: &GroupInput,
        now: DateTime<Utc>,
    ) -> Result<CycleAggregate> {
        let history =
            self.store
                .aggregate_history(group, window.start, self.thresholds.trailing_cycles)?;
        let aggregate = build_aggregate(group, window, input, &history, &self.thresholds, now)?;
        self.store.put_aggregate(&aggregate)?;
        Ok(aggregate)
    }
}

fn build_aggregate(
    group: &GroupKey,
    window: CycleWindow,
    input: &GroupInput,
    history: &[CycleAggregate],
    thresholds: &QualityThresholds,
    now: DateTime<Utc>,
) -> Result<CycleAggregate> {
    let mut currency: Option<&str> = None;
    let mut total_quantity = Decimal::ZERO;
    let mut total_cost = Decimal::ZERO;
    for event in &input.events {
        let event_currency = event.vendor_cost_data.currency.as_str();
        match currency {
            Some(first) if first != event_currency => {
                return Err(EngineError::mixed_currency(group, first, event_currency));
            }
            Some(_) => {}
            None => currency = Some(event_currency),
        }
        total_quantity += event.quantity;
        total_cost += event.vendor_cost_data.total_cost;
    }
    // Trailing zeros would leak vendor scale into the wire form.
    let total_quantity = total_quantity.normalize();
    let total_cost = total_cost.normalize();

    let quality_metrics = quality::evaluate(
        &GroupQuality {
            events: &input.events,
            quarantined: input.quarantined,
            total_quantity,
            total_cost,
            history,
            cycle_end: window.end,
        },
        thresholds,
    );

    Ok(CycleAggregate {
        group: group.clone(),
        cycle_start: window.start,
        cycle_end: window.end,
        unit: input.events.first().map(|e| e.unit),
        currency: currency.map(str::to_string),
        total_quantity,
        total_cost,
        event_count: input.events.len() as u64,
        cost_breakdown: quality::cost_breakdown(&input.events),
        quality_metrics,
        aggregated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::audit::MemoryAudit;
    use crate::engine::testing::{dec, retell_event};
    use chrono::TimeZone;
    use tally_core::{AgentId, QuarantinedEvent, ValidationError};
    use tally_store::MemoryStore;

    fn march() -> CycleWindow {
        CycleWindow::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn request() -> AggregationRequest {
        AggregationRequest {
            tenant_id: TenantId::new("t1").unwrap(),
            client_id: Some(ClientId::new("c1").unwrap()),
            cycle_start: march().start,
            cycle_end: march().end,
            correlation_id: Some(CorrelationId::new("agg-1").unwrap()),
        }
    }

    fn engine(store: Arc<MemoryStore>, audit: Arc<MemoryAudit>) -> AggregationEngine {
        AggregationEngine::new(store, QualityThresholds::default(), audit)
    }

    #[test]
    fn totals_drop_vendor_trailing_zeros() {
        let store = Arc::new(MemoryStore::new());
        store.insert_events(&[retell_event("call_123", "5.50")]).unwrap();

        let report = engine(store, Arc::new(MemoryAudit::new()))
            .run(&request())
            .unwrap();

        let aggregate = serde_json::to_value(&report.aggregates[0]).unwrap();
        assert_eq!(aggregate["totalQuantity"], "5.5");
        assert_eq!(aggregate["totalCost"], "0.275");
    }

    #[test]
    fn single_call_aggregates_to_its_cost() {
        let store = Arc::new(MemoryStore::new());
        store.insert_events(&[retell_event("call_123", "5.5")]).unwrap();

        let audit = Arc::new(MemoryAudit::new());
        let report = engine(store, audit.clone()).run(&request()).unwrap();

        assert_eq!(report.aggregates.len(), 1);
        let aggregate = &report.aggregates[0];
        assert_eq!(aggregate.total_quantity, dec("5.5"));
        assert_eq!(aggregate.total_cost, dec("0.275"));
        assert_eq!(aggregate.event_count, 1);
        assert_eq!(aggregate.currency.as_deref(), Some("USD"));
        assert_eq!(aggregate.cost_breakdown.avg_unit_cost, Some(dec("0.05")));
        assert_eq!(aggregate.quality_metrics.completeness_score, Decimal::ONE);

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, AuditKind::Aggregation);
        assert_eq!(records[0].events_aggregated, 1);
    }

    #[test]
    fn groups_split_by_agent() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(&[
                retell_event("call_1", "1").with_agent(Some(AgentId::new("agent_a").unwrap())),
                retell_event("call_2", "2").with_agent(Some(AgentId::new("agent_b").unwrap())),
                retell_event("call_3", "3").with_agent(Some(AgentId::new("agent_a").unwrap())),
            ])
            .unwrap();

        let report = engine(store, Arc::new(MemoryAudit::new()))
            .run(&request())
            .unwrap();
        let totals: Vec<(Option<&str>, Decimal)> = report
            .aggregates
            .iter()
            .map(|a| (a.group.agent_id.as_ref().map(AgentId::as_str), a.total_quantity))
            .collect();
        assert_eq!(
            totals,
            vec![(Some("agent_a"), dec("4")), (Some("agent_b"), dec("2"))]
        );
        assert_eq!(report.events_aggregated, 3);
    }

    #[test]
    fn rerun_is_stable() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_events(&[retell_event("call_1", "5.5"), retell_event("call_2", "2.25")])
            .unwrap();
        let engine = engine(store.clone(), Arc::new(MemoryAudit::new()));

        let first = engine.run(&request()).unwrap();
        let second = engine.run(&request()).unwrap();
        assert_eq!(first.aggregates.len(), second.aggregates.len());
        for (a, b) in first.aggregates.iter().zip(&second.aggregates) {
            assert!(a.same_content(b));
        }

        let stored = store
            .aggregates_for_cycle(&TenantId::new("t1").unwrap(), None, &march())
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn mixed_currency_fails_only_its_group() {
        let store = Arc::new(MemoryStore::new());
        let mut eur = retell_event("call_eur", "1");
        eur.vendor_cost_data.currency = "EUR".into();
        let other_agent =
            retell_event("call_3", "1").with_agent(Some(AgentId::new("agent_x").unwrap()));
        store
            .insert_events(&[retell_event("call_usd", "1"), eur, other_agent])
            .unwrap();

        let report = engine(store, Arc::new(MemoryAudit::new()))
            .run(&request())
            .unwrap();
        assert_eq!(report.failed_groups.len(), 1);
        assert!(report.failed_groups[0].error.contains("EUR"));
        assert_eq!(report.aggregates.len(), 1);
        assert_eq!(
            report.aggregates[0].group.agent_id,
            Some(AgentId::new("agent_x").unwrap())
        );
    }

    #[test]
    fn quarantined_only_group_still_reports() {
        let store = Arc::new(MemoryStore::new());
        let mut bad = retell_event("call_bad", "1");
        bad.quantity = dec("-1");
        store
            .put_quarantined(&[QuarantinedEvent::from_event(
                &bad,
                &ValidationError::NegativeQuantity {
                    quantity: bad.quantity,
                },
            )])
            .unwrap();

        let report = engine(store, Arc::new(MemoryAudit::new()))
            .run(&request())
            .unwrap();
        let aggregate = &report.aggregates[0];
        assert_eq!(aggregate.event_count, 0);
        assert_eq!(aggregate.total_cost, Decimal::ZERO);
        assert_eq!(aggregate.currency, None);
        assert_eq!(aggregate.quality_metrics.quarantined_events_count, 1);
    }

    #[test]
    fn history_drives_completeness() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), Arc::new(MemoryAudit::new()));

        // February: four calls.
        let mut february_events = Vec::new();
        for i in 0..4 {
            let mut event = retell_event(&format!("feb_{i}"), "1");
            event.event_timestamp = Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap();
            february_events.push(event);
        }
        store.insert_events(&february_events).unwrap();
        let february = AggregationRequest {
            cycle_start: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            cycle_end: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            ..request()
        };
        engine.run(&february).unwrap();

        // March: one call.
        store.insert_events(&[retell_event("mar_0", "1")]).unwrap();
        let report = engine.run(&request()).unwrap();
        assert_eq!(
            report.aggregates[0].quality_metrics.completeness_score,
            dec("0.25")
        );
    }
}
