//! Aggregation primitives.
//!
//! `Aggregator` answers one generic question: group the batch table by
//! some dimensions and reduce one measure with one function. The derived
//! families (share-of-total, year-over-year, ranking) are pure functions
//! over its output rows.
//!
//! RULES:
//!   - Excluded fields are rejected as grouping keys and as measures.
//!   - Ratios follow NULLIF semantics: a zero denominator yields None.
//!   - Output order is deterministic (sorted by keys).

use crate::{
    config::CleaningPolicy,
    error::{PipelineError, PipelineResult},
    exclusion_stage::FieldRegistry,
    schema::Field,
    store::{Cell, PipelineStore},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Query model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Field(Field),
    /// Calendar year of the order date.
    OrderYear,
    /// Configured discount band label.
    DiscountBand,
    /// "discounted" when discount > 0, else "full_price".
    DiscountFlag,
}

impl Dimension {
    /// Field whose inclusion status governs this dimension.
    pub fn source_field(self) -> Field {
        match self {
            Dimension::Field(f) => f,
            Dimension::OrderYear => Field::OrderDate,
            Dimension::DiscountBand | Dimension::DiscountFlag => Field::Discount,
        }
    }

    fn sql_expr(self, policy: &CleaningPolicy) -> String {
        match self {
            Dimension::Field(f) => f.column().to_string(),
            Dimension::OrderYear => "strftime('%Y', order_date)".to_string(),
            Dimension::DiscountBand => policy.discount_band_sql(),
            Dimension::DiscountFlag => {
                "CASE WHEN discount > 0 THEN 'discounted' ELSE 'full_price' END".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Sum,
    Avg,
    Count,
    CountDistinct,
    Min,
    Max,
    /// Continuous percentile, p in [0, 1].
    Percentile(f64),
    /// Sample standard deviation.
    StdDev,
    /// Sample standard deviation divided by the mean.
    CoefficientOfVariation,
}

impl AggFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Count => "count",
            AggFunc::CountDistinct => "count_distinct",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Percentile(_) => "percentile",
            AggFunc::StdDev => "stddev",
            AggFunc::CoefficientOfVariation => "coefficient_of_variation",
        }
    }

    /// SQLite aggregate expression over `column`, for the functions SQLite
    /// computes natively. The rest reduce in Rust.
    fn sql_reduction(self, column: &str) -> Option<String> {
        match self {
            AggFunc::Sum => Some(format!("SUM({column})")),
            AggFunc::Avg => Some(format!("AVG({column})")),
            AggFunc::Count => Some(format!("COUNT({column})")),
            AggFunc::CountDistinct => Some(format!("COUNT(DISTINCT {column})")),
            AggFunc::Min => Some(format!("MIN({column})")),
            AggFunc::Max => Some(format!("MAX({column})")),
            AggFunc::Percentile(_) | AggFunc::StdDev | AggFunc::CoefficientOfVariation => None,
        }
    }

    fn needs_numeric(self) -> bool {
        !matches!(self, AggFunc::Count | AggFunc::CountDistinct)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuery {
    pub group_by: Vec<Dimension>,
    pub measure: Field,
    pub func: AggFunc,
    /// Rows where the field equals the value are left out.
    pub exclude_rows: Vec<(Field, String)>,
}

impl AggregateQuery {
    pub fn new(group_by: Vec<Dimension>, measure: Field, func: AggFunc) -> Self {
        Self {
            group_by,
            measure,
            func,
            exclude_rows: Vec::new(),
        }
    }

    pub fn without_rows(mut self, field: Field, value: impl Into<String>) -> Self {
        self.exclude_rows.push((field, value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub keys: Vec<String>,
    pub value: Option<f64>,
}

// ── Aggregator ───────────────────────────────────────────────────────────────

pub struct Aggregator<'a> {
    store: &'a PipelineStore,
    registry: &'a FieldRegistry,
    policy: &'a CleaningPolicy,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        store: &'a PipelineStore,
        registry: &'a FieldRegistry,
        policy: &'a CleaningPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            policy,
        }
    }

    /// Reject queries touching excluded fields or reducing text numerically.
    pub fn validate(&self, query: &AggregateQuery) -> PipelineResult<()> {
        for dim in &query.group_by {
            self.registry.require_included(dim.source_field())?;
        }
        self.registry.require_included(query.measure)?;
        if query.func.needs_numeric() && !query.measure.is_numeric() {
            return Err(PipelineError::NonNumericMeasure {
                field: query.measure.column().to_string(),
                func: query.func.name().to_string(),
            });
        }
        Ok(())
    }

    /// One row per distinct key combination. With no grouping dimensions
    /// there is always exactly one row.
    pub fn aggregate(&self, query: &AggregateQuery) -> PipelineResult<Vec<AggregateRow>> {
        self.validate(query)?;

        let key_exprs: Vec<String> = query
            .group_by
            .iter()
            .map(|d| d.sql_expr(self.policy))
            .collect();
        if let Some(reduction) = query.func.sql_reduction(query.measure.column()) {
            let rows: BTreeMap<Vec<String>, Option<f64>> = self
                .store
                .grouped_reduction(&key_exprs, &reduction, &query.exclude_rows)?
                .into_iter()
                .collect();
            return Ok(rows
                .into_iter()
                .map(|(keys, value)| AggregateRow { keys, value })
                .collect());
        }

        let cells = self
            .store
            .grouped_cells(&key_exprs, query.measure, &query.exclude_rows)?;

        let mut groups: BTreeMap<Vec<String>, Vec<Cell>> = BTreeMap::new();
        for (keys, cell) in cells {
            groups.entry(keys).or_default().push(cell);
        }
        if query.group_by.is_empty() {
            groups.entry(Vec::new()).or_default();
        }

        Ok(groups
            .into_iter()
            .map(|(keys, cells)| AggregateRow {
                keys,
                value: reduce(query.func, &cells),
            })
            .collect())
    }

    /// Ungrouped reduction over the whole table.
    pub fn total(&self, measure: Field, func: AggFunc) -> PipelineResult<Option<f64>> {
        let rows = self.aggregate(&AggregateQuery::new(Vec::new(), measure, func))?;
        Ok(rows.first().and_then(|r| r.value))
    }
}

// ── Reductions ───────────────────────────────────────────────────────────────

/// Apply `func` to one group's cells. NULL cells are ignored, as in SQL.
pub fn reduce(func: AggFunc, cells: &[Cell]) -> Option<f64> {
    match func {
        AggFunc::Count => Some(cells.iter().filter(|c| **c != Cell::Null).count() as f64),
        AggFunc::CountDistinct => {
            let distinct: BTreeSet<String> = cells.iter().filter_map(Cell::distinct_key).collect();
            Some(distinct.len() as f64)
        }
        _ => {
            let values: Vec<f64> = cells.iter().filter_map(Cell::as_f64).collect();
            match func {
                AggFunc::Sum => (!values.is_empty()).then(|| values.iter().sum()),
                AggFunc::Avg => mean(&values),
                AggFunc::Min => values.iter().copied().reduce(f64::min),
                AggFunc::Max => values.iter().copied().reduce(f64::max),
                AggFunc::Percentile(p) => percentile_cont(&values, p),
                AggFunc::StdDev => sample_std_dev(&values),
                AggFunc::CoefficientOfVariation => {
                    let sd = sample_std_dev(&values)?;
                    ratio(sd, mean(&values)?)
                }
                AggFunc::Count | AggFunc::CountDistinct => None,
            }
        }
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1). None below two values.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Linear-interpolated percentile (PERCENTILE_CONT).
pub fn percentile_cont(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = p * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// `num / NULLIF(den, 0)`.
pub fn ratio(num: f64, den: f64) -> Option<f64> {
    (den != 0.0).then(|| num / den)
}

/// A share expressed as a percentage rounded to two decimals.
pub fn percentage(share: Option<f64>) -> Option<f64> {
    share.map(|s| (s * 100.0 * 100.0).round() / 100.0)
}

// ── Share of total ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRow {
    pub keys: Vec<String>,
    pub value: Option<f64>,
    pub share: Option<f64>,
}

fn partition_key(keys: &[String], partition: &[usize]) -> Vec<String> {
    partition
        .iter()
        .filter_map(|i| keys.get(*i).cloned())
        .collect()
}

/// `value / NULLIF(SUM(value) OVER (PARTITION BY keys[partition]), 0)`.
/// An empty partition means the global total of `rows`.
pub fn share_of_total(rows: &[AggregateRow], partition: &[usize]) -> Vec<ShareRow> {
    let mut totals: BTreeMap<Vec<String>, f64> = BTreeMap::new();
    for row in rows {
        *totals.entry(partition_key(&row.keys, partition)).or_default() +=
            row.value.unwrap_or(0.0);
    }
    rows.iter()
        .map(|row| {
            let total = totals
                .get(&partition_key(&row.keys, partition))
                .copied()
                .unwrap_or(0.0);
            ShareRow {
                keys: row.keys.clone(),
                value: row.value,
                share: row.value.and_then(|v| ratio(v, total)),
            }
        })
        .collect()
}

/// Share of each row against an externally supplied total, e.g. the
/// global total when `rows` come from a filtered query.
pub fn share_against(rows: &[AggregateRow], total: f64) -> Vec<ShareRow> {
    rows.iter()
        .map(|row| ShareRow {
            keys: row.keys.clone(),
            value: row.value,
            share: row.value.and_then(|v| ratio(v, total)),
        })
        .collect()
}

// ── Year over year ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YoyRow {
    pub group: Vec<String>,
    pub period: String,
    pub current: f64,
    /// Preceding observed period's value; 0 when there is none.
    pub previous: f64,
    pub delta: Option<f64>,
}

/// `(current - previous) / NULLIF(previous, 0)` per group, where the last
/// key of each row is the period and the others identify the group.
///
/// `previous` is the immediately preceding *observed* period of the same
/// group (LAG semantics, gaps are not filled) and defaults to 0, so a
/// group's first period always has an undefined delta.
pub fn year_over_year(rows: &[AggregateRow]) -> Vec<YoyRow> {
    let mut groups: BTreeMap<Vec<String>, Vec<(String, f64)>> = BTreeMap::new();
    for row in rows {
        let Some((period, group)) = row.keys.split_last() else {
            continue;
        };
        groups
            .entry(group.to_vec())
            .or_default()
            .push((period.clone(), row.value.unwrap_or(0.0)));
    }

    let mut out = Vec::new();
    for (group, mut series) in groups {
        series.sort_by(|a, b| a.0.cmp(&b.0));
        let mut previous = 0.0;
        for (period, current) in series {
            out.push(YoyRow {
                group: group.clone(),
                period,
                current,
                previous,
                delta: ratio(current - previous, previous),
            });
            previous = current;
        }
    }
    out
}

// ── Ranking ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRow {
    pub keys: Vec<String>,
    pub value: Option<f64>,
    pub rank: u32,
}

/// Rank rows by value, descending, within each partition.
///
/// Without a secondary key ties share a rank and the next rank skips
/// (1, 1, 3). With `secondary` (a key position) ties are broken by that
/// key ascending and every row gets a distinct rank.
pub fn competition_rank(
    rows: &[AggregateRow],
    partition: &[usize],
    secondary: Option<usize>,
) -> Vec<RankedRow> {
    let mut groups: BTreeMap<Vec<String>, Vec<&AggregateRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry(partition_key(&row.keys, partition))
            .or_default()
            .push(row);
    }

    let desc = |a: &Option<f64>, b: &Option<f64>| match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    };

    let mut out = Vec::new();
    for (_, mut members) in groups {
        members.sort_by(|a, b| {
            desc(&a.value, &b.value).then_with(|| match secondary {
                Some(i) => a.keys.get(i).cmp(&b.keys.get(i)),
                None => a.keys.cmp(&b.keys),
            })
        });
        let mut rank = 0u32;
        for (pos, row) in members.iter().enumerate() {
            let tied = pos > 0 && secondary.is_none() && members[pos - 1].value == row.value;
            if !tied {
                rank = pos as u32 + 1;
            }
            out.push(RankedRow {
                keys: row.keys.clone(),
                value: row.value,
                rank,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(keys: &[&str], value: f64) -> AggregateRow {
        AggregateRow {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            value: Some(value),
        }
    }

    #[test]
    fn ratio_with_zero_denominator_is_none() {
        assert_eq!(ratio(5.0, 0.0), None);
        assert_eq!(ratio(5.0, 2.0), Some(2.5));
    }

    #[test]
    fn ten_percent_market_share() {
        assert_eq!(percentage(ratio(1_000_000.0, 10_000_000.0)), Some(10.0));
    }

    #[test]
    fn percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile_cont(&values, 0.5), Some(2.5));
        assert_eq!(percentile_cont(&values, 0.0), Some(1.0));
        assert_eq!(percentile_cont(&values, 1.0), Some(4.0));
        assert_eq!(percentile_cont(&[], 0.5), None);
    }

    #[test]
    fn std_dev_and_cv() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let sd = sample_std_dev(&values).unwrap();
        assert!((sd - 2.138_089_935).abs() < 1e-6, "sd = {sd}");
        let cv = reduce(
            AggFunc::CoefficientOfVariation,
            &values.iter().map(|v| Cell::Number(*v)).collect::<Vec<_>>(),
        )
        .unwrap();
        assert!((cv - sd / 5.0).abs() < 1e-9);
        assert_eq!(sample_std_dev(&[1.0]), None);
    }

    #[test]
    fn count_distinct_ignores_nulls() {
        let cells = vec![
            Cell::Text("A".into()),
            Cell::Text("A".into()),
            Cell::Null,
            Cell::Text("B".into()),
        ];
        assert_eq!(reduce(AggFunc::CountDistinct, &cells), Some(2.0));
        assert_eq!(reduce(AggFunc::Count, &cells), Some(3.0));
        assert_eq!(reduce(AggFunc::Sum, &[Cell::Null]), None);
    }

    #[test]
    fn shares_sum_to_one_within_each_partition() {
        let rows = vec![
            row(&["EU", "Consumer"], 30.0),
            row(&["EU", "Corporate"], 70.0),
            row(&["US", "Consumer"], 5.0),
            row(&["US", "Corporate"], 15.0),
        ];
        let shares = share_of_total(&rows, &[0]);
        for market in ["EU", "US"] {
            let sum: f64 = shares
                .iter()
                .filter(|s| s.keys[0] == market)
                .filter_map(|s| s.share)
                .sum();
            assert!((sum - 1.0).abs() < 1e-9, "{market} shares sum to {sum}");
        }
        let global: f64 = share_of_total(&rows, &[]).iter().filter_map(|s| s.share).sum();
        assert!((global - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_partition_total_gives_no_share() {
        let rows = vec![row(&["EU"], 0.0)];
        assert_eq!(share_of_total(&rows, &[])[0].share, None);
    }

    #[test]
    fn first_period_yoy_uses_zero_baseline() {
        // Replicates the LAG(.., 1, 0) default: the first observed period
        // has previous = 0 and therefore an undefined delta.
        let rows = vec![row(&["EU", "2012"], 120.0), row(&["EU", "2011"], 100.0)];
        let yoy = year_over_year(&rows);
        assert_eq!(yoy[0].period, "2011");
        assert_eq!(yoy[0].previous, 0.0);
        assert_eq!(yoy[0].delta, None);
        assert_eq!(yoy[1].previous, 100.0);
        assert!((yoy[1].delta.unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn ties_share_a_rank() {
        let rows = vec![
            row(&["EU", "Furniture"], 50.0),
            row(&["EU", "Office Supplies"], 50.0),
            row(&["EU", "Technology"], 20.0),
        ];
        let ranked = competition_rank(&rows, &[0], None);
        let ranks: Vec<u32> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3]);

        let broken = competition_rank(&rows, &[0], Some(1));
        let ranks: Vec<u32> = broken.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(broken[0].keys[1], "Furniture");
    }
}
