//! Decision gate evaluator.
//!
//! Each gate is a pure function from aggregate rows to PASS/FAIL results
//! with the evidence metrics attached. All gates are evaluated; none
//! short-circuits another. A market passing both scale and stability is
//! classified core.
//!
//! Inputs (from events): the aggregate report.

use crate::{
    aggregate::YoyRow,
    aggregator_stage::{AggregateReport, DiscountShare, MarketScale, SegmentIndex},
    config::GateThresholds,
    error::PipelineResult,
    event::PipelineEvent,
    rng::StageRng,
    schema::Field,
    stage::PipelineStage,
    store::PipelineStore,
    types::RunId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexDirection {
    /// Index must exceed 1.0 in every market.
    OverIndex,
    /// Index must stay below 1.0 in every market.
    UnderIndex,
}

impl IndexDirection {
    pub fn holds(self, index: f64) -> bool {
        match self {
            IndexDirection::OverIndex  => index > 1.0,
            IndexDirection::UnderIndex => index < 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Scale,
    TrendStability,
    ConsistencyOfEffect,
    OrganicDemand,
}

impl GateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GateKind::Scale               => "scale",
            GateKind::TrendStability      => "trend_stability",
            GateKind::ConsistencyOfEffect => "consistency_of_effect",
            GateKind::OrganicDemand       => "organic_demand",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateOutcome {
    Pass,
    Fail,
}

impl GateOutcome {
    pub fn from_bool(pass: bool) -> Self {
        if pass { GateOutcome::Pass } else { GateOutcome::Fail }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GateOutcome::Pass => "PASS",
            GateOutcome::Fail => "FAIL",
        }
    }

    pub fn passed(self) -> bool {
        self == GateOutcome::Pass
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub metric: String,
    pub value: Option<f64>,
}

fn evidence(metric: &str, value: impl Into<Option<f64>>) -> Evidence {
    Evidence {
        metric: metric.to_string(),
        value: value.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: GateKind,
    /// Field whose value the gate judged (market, segment, category).
    pub dimension: Field,
    pub value: String,
    pub outcome: GateOutcome,
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketClass {
    Core,
    NonCore,
}

// ── Gates ────────────────────────────────────────────────────────────────────

/// Market sales share and order share must both reach their minimums.
/// Compared unrounded; the rounded percentages are evidence only.
pub fn scale_gate(scale: &[MarketScale], th: &GateThresholds) -> Vec<GateResult> {
    scale
        .iter()
        .map(|m| {
            let meets = |share: Option<f64>, min: f64| share.is_some_and(|s| s >= min);
            let pass = meets(m.sales_share, th.min_sales_share)
                && meets(m.order_share, th.min_order_share);
            GateResult {
                gate: GateKind::Scale,
                dimension: Field::Market,
                value: m.market.clone(),
                outcome: GateOutcome::from_bool(pass),
                evidence: vec![
                    evidence("sales_pct", m.sales_pct),
                    evidence("order_pct", m.order_pct),
                    evidence("min_sales_pct", th.min_sales_share * 100.0),
                    evidence("min_order_pct", th.min_order_share * 100.0),
                ],
            }
        })
        .collect()
}

/// FAIL when more than `max_negative` periods declined, or when any two
/// consecutive periods declined. Undefined deltas count as not negative.
pub fn trend_is_stable(deltas: &[Option<f64>], max_negative: usize) -> bool {
    let negative: Vec<bool> = deltas.iter().map(|d| d.is_some_and(|v| v < 0.0)).collect();
    let count = negative.iter().filter(|n| **n).count();
    let consecutive = negative.windows(2).any(|w| w[0] && w[1]);
    count <= max_negative && !consecutive
}

pub fn stability_gate(trend: &[YoyRow], th: &GateThresholds) -> Vec<GateResult> {
    let mut by_market: BTreeMap<String, Vec<&YoyRow>> = BTreeMap::new();
    for row in trend {
        let market = row.group.first().cloned().unwrap_or_default();
        by_market.entry(market).or_default().push(row);
    }

    by_market
        .into_iter()
        .map(|(market, mut rows)| {
            rows.sort_by(|a, b| a.period.cmp(&b.period));
            let deltas: Vec<Option<f64>> = rows.iter().map(|r| r.delta).collect();
            let negatives = deltas.iter().filter(|d| d.is_some_and(|v| v < 0.0)).count();
            let mut ev: Vec<Evidence> = rows
                .iter()
                .map(|r| evidence(&format!("yoy_{}", r.period), r.delta))
                .collect();
            ev.push(evidence("negative_periods", negatives as f64));
            GateResult {
                gate: GateKind::TrendStability,
                dimension: Field::Market,
                value: market,
                outcome: GateOutcome::from_bool(trend_is_stable(&deltas, th.max_negative_periods)),
                evidence: ev,
            }
        })
        .collect()
}

/// A segment passes when its index sits on the configured side of 1.0 in
/// every market it appears in.
pub fn consistency_gate(index: &[SegmentIndex], th: &GateThresholds) -> Vec<GateResult> {
    let mut by_segment: BTreeMap<String, Vec<&SegmentIndex>> = BTreeMap::new();
    for row in index {
        by_segment.entry(row.segment.clone()).or_default().push(row);
    }

    by_segment
        .into_iter()
        .map(|(segment, rows)| {
            let pass = rows
                .iter()
                .all(|r| r.index.is_some_and(|i| th.segment_direction.holds(i)));
            let indices: Vec<f64> = rows.iter().filter_map(|r| r.index).collect();
            GateResult {
                gate: GateKind::ConsistencyOfEffect,
                dimension: Field::Segment,
                value: segment,
                outcome: GateOutcome::from_bool(pass),
                evidence: vec![
                    evidence("markets", rows.len() as f64),
                    evidence("min_index", indices.iter().copied().reduce(f64::min)),
                    evidence("max_index", indices.iter().copied().reduce(f64::max)),
                ],
            }
        })
        .collect()
}

/// Demand is organic when the discounted-order share stays below the cutoff.
pub fn organic_demand_gate(discount: &[DiscountShare], th: &GateThresholds) -> Vec<GateResult> {
    discount
        .iter()
        .map(|d| {
            let pass = d
                .discounted_share
                .is_some_and(|s| s < th.organic_max_discounted_share);
            GateResult {
                gate: GateKind::OrganicDemand,
                dimension: Field::Category,
                value: d.category.clone(),
                outcome: GateOutcome::from_bool(pass),
                evidence: vec![
                    evidence("discounted_share", d.discounted_share),
                    evidence("cutoff", th.organic_max_discounted_share),
                ],
            }
        })
        .collect()
}

/// Evaluate every gate whose input section is present.
pub fn evaluate_all(report: &AggregateReport, th: &GateThresholds) -> Vec<GateResult> {
    let mut results = Vec::new();
    match &report.market_scale {
        Some(rows) => results.extend(scale_gate(rows, th)),
        None => log::warn!("Scale gate skipped: market scale unavailable"),
    }
    match &report.market_trend {
        Some(rows) => results.extend(stability_gate(rows, th)),
        None => log::warn!("Stability gate skipped: market trend unavailable"),
    }
    match &report.segment_index {
        Some(rows) => results.extend(consistency_gate(rows, th)),
        None => log::warn!("Consistency gate skipped: segment index unavailable"),
    }
    match &report.category_discount {
        Some(rows) => results.extend(organic_demand_gate(rows, th)),
        None => log::warn!("Organic demand gate skipped: category discount unavailable"),
    }
    results
}

/// Core iff the market passed both the scale and the stability gate.
pub fn classify_markets(results: &[GateResult]) -> Vec<(String, MarketClass)> {
    let outcome = |gate: GateKind, market: &str| {
        results
            .iter()
            .find(|r| r.gate == gate && r.value == market)
            .map(|r| r.outcome.passed())
            .unwrap_or(false)
    };

    results
        .iter()
        .filter(|r| r.gate == GateKind::Scale)
        .map(|r| {
            let core = outcome(GateKind::Scale, &r.value)
                && outcome(GateKind::TrendStability, &r.value);
            let class = if core { MarketClass::Core } else { MarketClass::NonCore };
            (r.value.clone(), class)
        })
        .collect()
}

pub struct GateStage {
    run_id: RunId,
    thresholds: GateThresholds,
    pub results: Vec<GateResult>,
    pub markets: Vec<(String, MarketClass)>,
}

impl GateStage {
    pub fn new(run_id: RunId, thresholds: GateThresholds) -> Self {
        Self {
            run_id,
            thresholds,
            results: Vec::new(),
            markets: Vec::new(),
        }
    }
}

impl PipelineStage for GateStage {
    fn name(&self) -> &'static str {
        "gates"
    }

    fn run(
        &mut self,
        store: &PipelineStore,
        events_in: &[PipelineEvent],
        _rng: &mut StageRng,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let Some(report) = events_in.iter().rev().find_map(|e| match e {
            PipelineEvent::AggregatesComputed { report } => Some(report),
            _ => None,
        }) else {
            log::warn!("Gate evaluator ran without an aggregate report");
            return Ok(vec![]);
        };

        let results = evaluate_all(report, &self.thresholds);
        let markets = classify_markets(&results);

        let mut events = Vec::new();
        for result in &results {
            store.insert_gate_result(&self.run_id, result)?;
            log::debug!(
                "Gate {} on {}={}: {}",
                result.gate.as_str(),
                result.dimension,
                result.value,
                result.outcome.as_str()
            );
            events.push(PipelineEvent::GateEvaluated {
                result: result.clone(),
            });
        }
        for (market, class) in &markets {
            log::info!("Market {market} classified {class:?}");
            events.push(PipelineEvent::MarketClassified {
                market: market.clone(),
                class: *class,
            });
        }
        log::info!(
            "Gates evaluated: {} result(s), {} passed",
            results.len(),
            results.iter().filter(|r| r.outcome.passed()).count()
        );

        self.results = results;
        self.markets = markets;
        Ok(events)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_decline_is_stable_but_consecutive_is_not() {
        assert!(trend_is_stable(&[None, Some(0.1), Some(-0.05), Some(0.2)], 1));
        assert!(!trend_is_stable(&[None, Some(-0.1), Some(-0.05), Some(0.2)], 2));
        assert!(!trend_is_stable(&[None, Some(-0.1), Some(0.3), Some(-0.2)], 1));
    }

    #[test]
    fn index_direction() {
        assert!(IndexDirection::OverIndex.holds(1.2));
        assert!(!IndexDirection::OverIndex.holds(1.0));
        assert!(IndexDirection::UnderIndex.holds(0.8));
    }
}
