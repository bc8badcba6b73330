//! Reporting extract: star-schema dimension and fact files.
//!
//! Surrogate keys are derived in the store. This module decides which
//! measures the fact file may carry (excluded measures are emitted as
//! empty cells) and writes each table as a CSV file.

use crate::{
    error::PipelineResult,
    exclusion_stage::FieldRegistry,
    schema::Field,
    store::{FactMeasures, PipelineStore},
};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimProduct {
    /// NULL when category or sub-category is missing.
    pub product_key: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub product_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimCountry {
    pub country_key: Option<String>,
    pub market: Option<String>,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimSegment {
    pub segment_key: i64,
    pub segment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimDate {
    /// YYYYMMDD
    pub date_key: i64,
    pub date: String,
    pub year: i64,
    pub quarter: i64,
    pub month: i64,
    pub day: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactSales {
    pub row_id: i64,
    pub date_key: i64,
    pub segment_key: Option<i64>,
    pub country_key: Option<String>,
    pub product_key: Option<String>,
    pub sales: Option<f64>,
    pub quantity: Option<i64>,
    pub discount: Option<f64>,
    pub discount_flag: Option<i64>,
    pub profit: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct Extract {
    pub products: Vec<DimProduct>,
    pub countries: Vec<DimCountry>,
    pub segments: Vec<DimSegment>,
    pub dates: Vec<DimDate>,
    pub facts: Vec<FactSales>,
}

impl FactMeasures {
    /// Expose only measures the registry still includes.
    pub fn from_registry(registry: &FieldRegistry) -> Self {
        Self {
            sales: registry.is_included(Field::Sales),
            quantity: registry.is_included(Field::Quantity),
            discount: registry.is_included(Field::Discount),
            profit: registry.is_included(Field::Profit),
        }
    }
}

pub fn build_extract(store: &PipelineStore, registry: &FieldRegistry) -> PipelineResult<Extract> {
    let measures = FactMeasures::from_registry(registry);
    if !measures.profit {
        log::info!("Profit is excluded; fact_sales.profit will be empty");
    }
    Ok(Extract {
        products: store.product_dimension()?,
        countries: store.country_dimension()?,
        segments: store.segment_dimension()?,
        dates: store.date_dimension()?,
        facts: store.fact_sales(measures)?,
    })
}

fn write_table<T: Serialize>(dir: &Path, name: &str, rows: &[T]) -> PipelineResult<()> {
    let path = dir.join(format!("{name}.csv"));
    let mut writer = csv::Writer::from_path(&path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::debug!("Wrote {} row(s) to {}", rows.len(), path.display());
    Ok(())
}

/// Write every table of `extract` as `<dir>/<table>.csv`.
pub fn write_extract(extract: &Extract, dir: &Path) -> PipelineResult<()> {
    std::fs::create_dir_all(dir)?;
    write_table(dir, "dim_product", &extract.products)?;
    write_table(dir, "dim_country", &extract.countries)?;
    write_table(dir, "dim_segment", &extract.segments)?;
    write_table(dir, "dim_date", &extract.dates)?;
    write_table(dir, "fact_sales", &extract.facts)?;
    log::info!(
        "Extract written to {}: {} fact row(s)",
        dir.display(),
        extract.facts.len()
    );
    Ok(())
}
