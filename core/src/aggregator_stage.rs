//! Aggregator stage: the named analyses behind the allocation decision.
//!
//! Every section is built from the generic `Aggregator` query plus the
//! share/YoY/rank helpers. A section that needs an excluded field is
//! skipped (None) with a warning, never silently computed.
//!
//! Inputs (from events): the field registry.

use crate::{
    aggregate::{
        competition_rank, percentage, ratio, share_of_total, year_over_year, AggFunc,
        AggregateQuery, Aggregator, Dimension, RankedRow, ShareRow, YoyRow,
    },
    config::CleaningPolicy,
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    exclusion_stage::FieldRegistry,
    rng::StageRng,
    schema::Field,
    stage::PipelineStage,
    store::PipelineStore,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketScale {
    pub market: String,
    pub total_sales: f64,
    pub order_count: i64,
    /// Average order value.
    pub aov: Option<f64>,
    /// Unrounded fractions of the global totals; gates decide on these.
    pub sales_share: Option<f64>,
    pub order_share: Option<f64>,
    /// The same shares as percentages rounded to two decimals, for display.
    pub sales_pct: Option<f64>,
    pub order_pct: Option<f64>,
}

/// Segment sales share inside one market relative to its global share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentIndex {
    pub market: String,
    pub segment: String,
    pub local_share: Option<f64>,
    pub global_share: Option<f64>,
    pub index: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountShare {
    pub category: String,
    pub orders: i64,
    pub discounted_orders: i64,
    pub discounted_share: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub market_scale: Option<Vec<MarketScale>>,
    /// Keys: [market], period = order year.
    pub market_trend: Option<Vec<YoyRow>>,
    pub segment_index: Option<Vec<SegmentIndex>>,
    pub category_discount: Option<Vec<DiscountShare>>,
    /// Keys: [market, category], ranked by sales within market.
    pub category_rank: Option<Vec<RankedRow>>,
    pub ship_mode_mix: Option<Vec<ShareRow>>,
    pub discount_band_mix: Option<Vec<ShareRow>>,
}

fn sum_sales(by: Vec<Dimension>) -> AggregateQuery {
    AggregateQuery::new(by, Field::Sales, AggFunc::Sum)
}

fn distinct_orders(by: Vec<Dimension>) -> AggregateQuery {
    AggregateQuery::new(by, Field::OrderId, AggFunc::CountDistinct)
}

pub fn market_scale(agg: &Aggregator<'_>) -> PipelineResult<Vec<MarketScale>> {
    let sales = agg.aggregate(&sum_sales(vec![Dimension::Field(Field::Market)]))?;
    let orders = agg.aggregate(&distinct_orders(vec![Dimension::Field(Field::Market)]))?;
    let total_sales = agg.total(Field::Sales, AggFunc::Sum)?.unwrap_or(0.0);
    let total_orders = agg.total(Field::OrderId, AggFunc::CountDistinct)?.unwrap_or(0.0);

    Ok(sales
        .iter()
        .map(|row| {
            let market = row.keys[0].clone();
            let market_sales = row.value.unwrap_or(0.0);
            let order_count = orders
                .iter()
                .find(|o| o.keys == row.keys)
                .and_then(|o| o.value)
                .unwrap_or(0.0);
            let sales_share = ratio(market_sales, total_sales);
            let order_share = ratio(order_count, total_orders);
            MarketScale {
                market,
                total_sales: market_sales,
                order_count: order_count as i64,
                aov: ratio(market_sales, order_count),
                sales_share,
                order_share,
                sales_pct: percentage(sales_share),
                order_pct: percentage(order_share),
            }
        })
        .collect())
}

pub fn market_trend(agg: &Aggregator<'_>) -> PipelineResult<Vec<YoyRow>> {
    let rows = agg.aggregate(&sum_sales(vec![
        Dimension::Field(Field::Market),
        Dimension::OrderYear,
    ]))?;
    Ok(year_over_year(&rows))
}

pub fn segment_index(agg: &Aggregator<'_>) -> PipelineResult<Vec<SegmentIndex>> {
    let local = agg.aggregate(&sum_sales(vec![
        Dimension::Field(Field::Market),
        Dimension::Field(Field::Segment),
    ]))?;
    let global = share_of_total(
        &agg.aggregate(&sum_sales(vec![Dimension::Field(Field::Segment)]))?,
        &[],
    );

    Ok(share_of_total(&local, &[0])
        .into_iter()
        .map(|row| {
            let global_share = global
                .iter()
                .find(|g| g.keys[0] == row.keys[1])
                .and_then(|g| g.share);
            let index = match (row.share, global_share) {
                (Some(l), Some(g)) => ratio(l, g),
                _ => None,
            };
            SegmentIndex {
                market: row.keys[0].clone(),
                segment: row.keys[1].clone(),
                local_share: row.share,
                global_share,
                index,
            }
        })
        .collect())
}

pub fn category_discount(agg: &Aggregator<'_>) -> PipelineResult<Vec<DiscountShare>> {
    let orders = agg.aggregate(&distinct_orders(vec![Dimension::Field(Field::Category)]))?;
    let flagged = agg.aggregate(&distinct_orders(vec![
        Dimension::Field(Field::Category),
        Dimension::DiscountFlag,
    ]))?;

    Ok(orders
        .iter()
        .map(|row| {
            let total = row.value.unwrap_or(0.0);
            let discounted = flagged
                .iter()
                .find(|f| f.keys[0] == row.keys[0] && f.keys[1] == "discounted")
                .and_then(|f| f.value)
                .unwrap_or(0.0);
            DiscountShare {
                category: row.keys[0].clone(),
                orders: total as i64,
                discounted_orders: discounted as i64,
                discounted_share: ratio(discounted, total),
            }
        })
        .collect())
}

pub fn category_rank(agg: &Aggregator<'_>) -> PipelineResult<Vec<RankedRow>> {
    let rows = agg.aggregate(&sum_sales(vec![
        Dimension::Field(Field::Market),
        Dimension::Field(Field::Category),
    ]))?;
    Ok(competition_rank(&rows, &[0], None))
}

pub fn sales_mix(agg: &Aggregator<'_>, by: Dimension) -> PipelineResult<Vec<ShareRow>> {
    let rows = agg.aggregate(&sum_sales(vec![by]))?;
    Ok(share_of_total(&rows, &[]))
}

/// Keep a section's rows, or skip it when it touches an excluded field.
fn section<T>(name: &str, result: PipelineResult<T>) -> PipelineResult<Option<T>> {
    match result {
        Ok(rows) => Ok(Some(rows)),
        Err(PipelineError::ExcludedField { field, status }) => {
            log::warn!("Skipping {name}: field {field} is {status}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub fn build_report(agg: &Aggregator<'_>) -> PipelineResult<AggregateReport> {
    Ok(AggregateReport {
        market_scale: section("market scale", market_scale(agg))?,
        market_trend: section("market trend", market_trend(agg))?,
        segment_index: section("segment index", segment_index(agg))?,
        category_discount: section("category discount", category_discount(agg))?,
        category_rank: section("category rank", category_rank(agg))?,
        ship_mode_mix: section(
            "ship mode mix",
            sales_mix(agg, Dimension::Field(Field::ShipMode)),
        )?,
        discount_band_mix: section(
            "discount band mix",
            sales_mix(agg, Dimension::DiscountBand),
        )?,
    })
}

pub struct AggregatorStage {
    policy: CleaningPolicy,
    pub report: Option<AggregateReport>,
}

impl AggregatorStage {
    pub fn new(policy: CleaningPolicy) -> Self {
        Self {
            policy,
            report: None,
        }
    }
}

impl PipelineStage for AggregatorStage {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    fn run(
        &mut self,
        store: &PipelineStore,
        events_in: &[PipelineEvent],
        _rng: &mut StageRng,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let registry = events_in
            .iter()
            .rev()
            .find_map(|e| match e {
                PipelineEvent::FieldRegistryBuilt { registry } => Some(registry.clone()),
                _ => None,
            })
            .unwrap_or_else(|| {
                log::warn!("Aggregator ran without a field registry; treating all fields as included");
                FieldRegistry::all_included()
            });

        let agg = Aggregator::new(store, &registry, &self.policy);
        let report = build_report(&agg)?;
        log::info!(
            "Aggregates computed for {} market(s)",
            report.market_scale.as_ref().map_or(0, Vec::len)
        );

        self.report = Some(report.clone());
        Ok(vec![PipelineEvent::AggregatesComputed { report }])
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
