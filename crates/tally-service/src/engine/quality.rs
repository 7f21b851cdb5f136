//! Reconciliation and data-quality rules.
//!
//! Every rule reads one group's events for the cycle plus the group's trailing
//! aggregates. Rules with an unset threshold do not run.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tally_core::{AnomalyFlag, CostBreakdown, CycleAggregate, QualityMetrics, UsageEvent};

use crate::config::QualityThresholds;

/// Trailing cycles needed before deviation rules fire.
const MIN_HISTORY: usize = 2;

/// Decimal places kept on the completeness score.
const SCORE_DP: u32 = 4;

/// Unit-cost statistics over the events' effective unit cost.
///
/// Zero-quantity events are left out; they still count towards totals.
#[must_use]
pub fn cost_breakdown(events: &[UsageEvent]) -> CostBreakdown {
    let costs: Vec<Decimal> = events
        .iter()
        .filter_map(UsageEvent::effective_unit_cost)
        .collect();
    let Some((mean, variance)) = mean_and_variance(&costs) else {
        return CostBreakdown::default();
    };
    CostBreakdown {
        avg_unit_cost: Some(mean),
        min_unit_cost: costs.iter().min().copied(),
        max_unit_cost: costs.iter().max().copied(),
        variance,
        sample_count: costs.len() as u64,
    }
}

/// Population mean and variance. The variance is `None` if it overflows.
fn mean_and_variance(values: &[Decimal]) -> Option<(Decimal, Option<Decimal>)> {
    if values.is_empty() {
        return None;
    }
    let count = Decimal::from(values.len());
    let mean = values
        .iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v))?
        .checked_div(count)?;
    let variance = values
        .iter()
        .try_fold(Decimal::ZERO, |acc, v| {
            let d = v.checked_sub(mean)?;
            acc.checked_add(d.checked_mul(d)?)
        })
        .and_then(|sum| sum.checked_div(count));
    Some((mean, variance))
}

/// Events timestamped in the cycle but collected at or after its close.
#[must_use]
pub fn late_events(events: &[UsageEvent], cycle_end: DateTime<Utc>) -> u64 {
    events
        .iter()
        .filter(|e| e.collection_metadata.collected_at >= cycle_end)
        .count() as u64
}

/// Observed event count relative to the trailing average, in `[0, 1]`.
///
/// `1` without history. A shortfall within `tolerance` still scores `1`.
#[must_use]
pub fn completeness_score(
    event_count: u64,
    history: &[CycleAggregate],
    tolerance: Option<Decimal>,
) -> Decimal {
    let counts: Vec<Decimal> = history.iter().map(|a| Decimal::from(a.event_count)).collect();
    let Some((expected, _)) = mean_and_variance(&counts) else {
        return Decimal::ONE;
    };
    if expected.is_zero() {
        return Decimal::ONE;
    }
    let ratio = Decimal::from(event_count)
        .checked_div(expected)
        .unwrap_or(Decimal::ONE)
        .min(Decimal::ONE);
    match tolerance {
        Some(tolerance) if ratio >= Decimal::ONE - tolerance => Decimal::ONE,
        _ => ratio.round_dp(SCORE_DP),
    }
}

/// Whether `value` lies more than `std_devs` standard deviations from the mean of
/// `history`, in the direction(s) allowed.
///
/// Compares squares so no square root is needed. With zero variance any deviation
/// counts.
fn deviates(value: Decimal, history: &[Decimal], std_devs: Decimal, upward_only: bool) -> bool {
    if history.len() < MIN_HISTORY {
        return false;
    }
    let Some((mean, Some(variance))) = mean_and_variance(history) else {
        return false;
    };
    let delta = value - mean;
    if delta.is_zero() || (upward_only && delta.is_sign_negative()) {
        return false;
    }
    match (delta.checked_mul(delta), std_devs.checked_mul(std_devs)) {
        (Some(delta_sq), Some(k_sq)) => match k_sq.checked_mul(variance) {
            Some(bound) => delta_sq > bound,
            None => false,
        },
        _ => false,
    }
}

/// Distinct vendor resources with identical timestamp, quantity and cost.
fn duplicate_suspected(events: &[UsageEvent]) -> bool {
    let mut seen: HashMap<(DateTime<Utc>, Decimal, Decimal), &str> = HashMap::new();
    for event in events {
        let Some(resource_id) = event.resource_id.as_deref() else {
            continue;
        };
        let fingerprint = (
            event.event_timestamp,
            event.quantity.normalize(),
            event.vendor_cost_data.total_cost.normalize(),
        );
        match seen.get(&fingerprint) {
            Some(other) if *other != resource_id => return true,
            Some(_) => {}
            None => {
                seen.insert(fingerprint, resource_id);
            }
        }
    }
    false
}

/// Inputs of one group's quality evaluation.
pub struct GroupQuality<'a> {
    /// The group's events in the cycle.
    pub events: &'a [UsageEvent],
    /// Quarantined events attributed to the group.
    pub quarantined: u64,
    /// Total quantity of the cycle.
    pub total_quantity: Decimal,
    /// Total cost of the cycle.
    pub total_cost: Decimal,
    /// Trailing aggregates of the group, newest first.
    pub history: &'a [CycleAggregate],
    /// Close of the cycle.
    pub cycle_end: DateTime<Utc>,
}

/// Evaluate every configured rule for a group.
#[must_use]
pub fn evaluate(input: &GroupQuality<'_>, thresholds: &QualityThresholds) -> QualityMetrics {
    let event_count = input.events.len() as u64;
    let mut flags = BTreeSet::new();

    if let Some(k) = thresholds.spike_std_devs {
        let quantities: Vec<Decimal> = input.history.iter().map(|a| a.total_quantity).collect();
        if deviates(input.total_quantity, &quantities, k, true) {
            flags.insert(AnomalyFlag::HighUsageSpike);
        }
    }
    if let Some(k) = thresholds.cost_std_devs {
        let costs: Vec<Decimal> = input.history.iter().map(|a| a.total_cost).collect();
        if deviates(input.total_cost, &costs, k, false) {
            flags.insert(AnomalyFlag::CostAnomaly);
        }
    }
    if let Some(max_ratio) = thresholds.missing_events_ratio {
        let seen = Decimal::from(event_count + input.quarantined);
        if input.quarantined > 0
            && Decimal::from(input.quarantined)
                .checked_div(seen)
                .is_some_and(|ratio| ratio > max_ratio)
        {
            flags.insert(AnomalyFlag::MissingEvents);
        }
    }
    if thresholds.detect_duplicates && duplicate_suspected(input.events) {
        flags.insert(AnomalyFlag::DuplicateSuspected);
    }

    QualityMetrics {
        completeness_score: completeness_score(
            event_count,
            input.history,
            thresholds.completeness_tolerance,
        ),
        late_events_count: late_events(input.events, input.cycle_end),
        quarantined_events_count: input.quarantined,
        anomaly_flags: flags.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{dec, retell_event};
    use chrono::{TimeZone, Utc};
    use tally_core::{CostBreakdown, GroupKey};

    fn history(points: &[(&str, &str, u64)]) -> Vec<CycleAggregate> {
        let event = retell_event("h", "1");
        points
            .iter()
            .map(|(quantity, cost, count)| CycleAggregate {
                group: GroupKey::of(&event),
                cycle_start: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                cycle_end: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
                unit: Some(event.unit),
                currency: Some("USD".into()),
                total_quantity: dec(quantity),
                total_cost: dec(cost),
                event_count: *count,
                cost_breakdown: CostBreakdown::default(),
                quality_metrics: QualityMetrics::default(),
                aggregated_at: Utc::now(),
            })
            .collect()
    }

    fn thresholds() -> QualityThresholds {
        QualityThresholds {
            completeness_tolerance: Some(dec("0.1")),
            spike_std_devs: Some(dec("3")),
            cost_std_devs: Some(dec("3")),
            missing_events_ratio: Some(dec("0.05")),
            detect_duplicates: true,
            trailing_cycles: 6,
        }
    }

    fn input<'a>(
        events: &'a [UsageEvent],
        history: &'a [CycleAggregate],
        quantity: &str,
        cost: &str,
    ) -> GroupQuality<'a> {
        GroupQuality {
            events,
            quarantined: 0,
            total_quantity: dec(quantity),
            total_cost: dec(cost),
            history,
            cycle_end: Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn breakdown_skips_zero_quantity() {
        let mut a = retell_event("a", "2");
        a.vendor_cost_data.total_cost = dec("0.10");
        let mut b = retell_event("b", "1");
        b.vendor_cost_data.total_cost = dec("0.07");
        let free = retell_event("c", "0");

        let breakdown = cost_breakdown(&[a, b, free]);
        assert_eq!(breakdown.sample_count, 2);
        assert_eq!(breakdown.min_unit_cost, Some(dec("0.05")));
        assert_eq!(breakdown.max_unit_cost, Some(dec("0.07")));
        assert_eq!(breakdown.avg_unit_cost, Some(dec("0.06")));
        assert_eq!(breakdown.variance, Some(dec("0.0001")));
    }

    #[test]
    fn no_history_means_complete_and_no_flags() {
        let events = [retell_event("a", "100")];
        let metrics = evaluate(&input(&events, &[], "100", "5"), &thresholds());
        assert_eq!(metrics.completeness_score, Decimal::ONE);
        assert!(metrics.anomaly_flags.is_empty());
    }

    #[test]
    fn completeness_against_trailing_average() {
        let history = history(&[("10", "1", 10), ("10", "1", 10)]);
        assert_eq!(completeness_score(5, &history, None), dec("0.5"));
        assert_eq!(completeness_score(9, &history, Some(dec("0.1"))), Decimal::ONE);
        assert_eq!(completeness_score(8, &history, Some(dec("0.1"))), dec("0.8"));
        assert_eq!(completeness_score(20, &history, None), Decimal::ONE);
    }

    #[test]
    fn spike_and_cost_anomaly() {
        let history = history(&[("100", "5", 10), ("110", "5.5", 10), ("90", "4.5", 10)]);
        let events = [retell_event("a", "1")];

        let normal = evaluate(&input(&events, &history, "105", "5.2"), &thresholds());
        assert!(normal.anomaly_flags.is_empty());

        let spike = evaluate(&input(&events, &history, "500", "25"), &thresholds());
        assert_eq!(
            spike.anomaly_flags,
            vec![AnomalyFlag::HighUsageSpike, AnomalyFlag::CostAnomaly]
        );

        // Drops are cost anomalies but never usage spikes.
        let drop = evaluate(&input(&events, &history, "1", "0.05"), &thresholds());
        assert_eq!(drop.anomaly_flags, vec![AnomalyFlag::CostAnomaly]);
    }

    #[test]
    fn unset_thresholds_disable_rules() {
        let history = history(&[("100", "5", 10), ("110", "5.5", 10)]);
        let events = [retell_event("a", "1")];
        let metrics = evaluate(
            &input(&events, &history, "5000", "250"),
            &QualityThresholds::default(),
        );
        assert!(metrics.anomaly_flags.is_empty());
    }

    #[test]
    fn quarantine_share_raises_missing_events() {
        let events = [retell_event("a", "1")];
        let mut group = input(&events, &[], "1", "0.05");
        group.quarantined = 1;
        let metrics = evaluate(&group, &thresholds());
        assert_eq!(metrics.quarantined_events_count, 1);
        assert_eq!(metrics.anomaly_flags, vec![AnomalyFlag::MissingEvents]);
    }

    #[test]
    fn identical_records_with_distinct_ids_are_suspicious() {
        let events = [retell_event("call_1", "5.5"), retell_event("call_2", "5.5")];
        let metrics = evaluate(&input(&events, &[], "11", "0.55"), &thresholds());
        assert_eq!(metrics.anomaly_flags, vec![AnomalyFlag::DuplicateSuspected]);

        let events = [retell_event("call_1", "5.5"), retell_event("call_2", "3")];
        let metrics = evaluate(&input(&events, &[], "8.5", "0.425"), &thresholds());
        assert!(metrics.anomaly_flags.is_empty());
    }

    #[test]
    fn late_events_are_counted() {
        let mut late = retell_event("late", "1");
        late.collection_metadata.collected_at = Utc.with_ymd_and_hms(2026, 4, 2, 0, 0, 0).unwrap();
        let events = [retell_event("on_time", "1"), late];
        assert_eq!(
            late_events(&events, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()),
            1
        );
    }
}
