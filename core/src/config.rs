use crate::{gate_stage::IndexDirection, schema::Field};
use serde::{Deserialize, Serialize};

// ── Decision gates ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateThresholds {
    /// Minimum share of global sales for a market to pass the scale gate.
    pub min_sales_share: f64,
    /// Minimum share of global orders for a market to pass the scale gate.
    pub min_order_share: f64,
    /// Negative YoY periods tolerated by the stability gate.
    pub max_negative_periods: usize,
    /// Side of 1.0 a segment's index must hold in every market.
    pub segment_direction: IndexDirection,
    /// Discounted-order share at or above which demand is not organic.
    pub organic_max_discounted_share: f64,
}

// ── Cleaning ───────────────────────────────────────────────────────

/// A measure flagged anomalous when its minimum is negative and deeper
/// than `multiple` times the minimum of `reference`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyCheck {
    pub measure: Field,
    pub reference: Field,
    pub multiple: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountBand {
    pub label: String,
    /// Inclusive upper edge.
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningPolicy {
    pub anomaly_checks: Vec<AnomalyCheck>,
    pub sample_size: usize,
    /// Ascending by `upper`. A zero or NULL discount is always "none".
    pub discount_bands: Vec<DiscountBand>,
}

impl CleaningPolicy {
    /// SQL CASE expression mapping the discount column to a band label.
    pub fn discount_band_sql(&self) -> String {
        let col = Field::Discount.column();
        let mut sql = format!("CASE WHEN {col} IS NULL OR {col} <= 0 THEN 'none'");
        for band in &self.discount_bands {
            sql.push_str(&format!(
                " WHEN {col} <= {} THEN '{}'",
                band.upper,
                band.label.replace('\'', "''")
            ));
        }
        sql.push_str(" ELSE 'other' END");
        sql
    }
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub gates: GateThresholds,
    pub cleaning: CleaningPolicy,
}

impl PipelineConfig {
    /// Load from the data/ directory.
    /// In tests, use PipelineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let gates_path = format!("{data_dir}/gates/gate_thresholds.json");
        let gates_content = std::fs::read_to_string(&gates_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {gates_path}: {e}"))?;
        let gates: GateThresholds = serde_json::from_str(&gates_content)?;

        let cleaning_path = format!("{data_dir}/cleaning/cleaning_policy.json");
        let cleaning_content = std::fs::read_to_string(&cleaning_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {cleaning_path}: {e}"))?;
        let mut cleaning: CleaningPolicy = serde_json::from_str(&cleaning_content)?;
        cleaning
            .discount_bands
            .sort_by(|a, b| a.upper.total_cmp(&b.upper));

        Ok(Self { gates, cleaning })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        Self {
            gates: GateThresholds {
                min_sales_share: 0.05,
                min_order_share: 0.05,
                max_negative_periods: 1,
                segment_direction: IndexDirection::OverIndex,
                organic_max_discounted_share: 0.5,
            },
            cleaning: CleaningPolicy {
                anomaly_checks: vec![AnomalyCheck {
                    measure: Field::Profit,
                    reference: Field::Sales,
                    multiple: 100.0,
                }],
                sample_size: 5,
                discount_bands: vec![
                    DiscountBand { label: "low".into(),    upper: 0.2 },
                    DiscountBand { label: "medium".into(), upper: 0.4 },
                    DiscountBand { label: "high".into(),   upper: 1.0 },
                ],
            },
        }
    }
}
