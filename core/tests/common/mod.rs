//! Shared fixtures for integration tests.
#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use retail_core::{engine::PipelineEngine, loader::TransactionRecord, schema::Field};

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid fixture date")
}

/// One order line with neutral defaults: an office-supplies binder sold
/// to a consumer, no discount, positive profit.
pub fn txn(row_id: i64, order_id: &str, order_date: &str, market: &str, country: &str) -> TransactionRecord {
    let ordered = date(order_date);
    TransactionRecord {
        row_id,
        order_id: order_id.to_string(),
        order_date: ordered,
        ship_date: ordered + Duration::days(3),
        ship_mode: Some("Standard Class".into()),
        customer_id: "AB-10015".into(),
        customer_name: Some("Aaron Bergman".into()),
        segment: Some("Consumer".into()),
        city: Some("Springfield".into()),
        state: Some("Central".into()),
        country: Some(country.to_string()),
        market: Some(market.to_string()),
        region: Some("Central".into()),
        product_id: "OFF-BI-10000001".into(),
        category: Some("Office Supplies".into()),
        sub_category: Some("Binders".into()),
        product_name: Some("Binder Clips".into()),
        sales: Some(100.0),
        quantity: Some(2),
        discount: Some(0.0),
        profit: Some(10.0),
        shipping_cost: Some(5.0),
        order_priority: Some("Medium".into()),
    }
}

/// Reassign the product columns; the product id follows the name so the
/// id/name mapping stays one-to-one.
pub fn product(mut r: TransactionRecord, category: &str, sub_category: &str, name: &str) -> TransactionRecord {
    r.category = Some(category.to_string());
    r.sub_category = Some(sub_category.to_string());
    r.product_name = Some(name.to_string());
    r.product_id = format!("PRD-{}", name.to_uppercase().replace(' ', "-"));
    r
}

pub fn sales(mut r: TransactionRecord, amount: f64) -> TransactionRecord {
    r.sales = Some(amount);
    r
}

pub fn segment(mut r: TransactionRecord, segment: &str) -> TransactionRecord {
    r.segment = Some(segment.to_string());
    r
}

pub fn discount(mut r: TransactionRecord, discount: f64) -> TransactionRecord {
    r.discount = Some(discount);
    r
}

/// A small multi-market dataset carrying the two known dirty mappings:
/// Austria split between EMEA and EU, and Staples split between Paper and
/// Fasteners.
pub fn dirty_fixture() -> Vec<TransactionRecord> {
    vec![
        txn(1, "EU-2011-1", "2011-03-01", "EU", "Austria"),
        txn(2, "EU-2011-2", "2011-05-10", "EMEA", "Austria"),
        txn(3, "EU-2012-1", "2012-02-14", "EMEA", "Austria"),
        txn(4, "EM-2012-1", "2012-06-01", "EMEA", "France"),
        txn(5, "EM-2013-1", "2013-01-20", "EMEA", "France"),
        txn(6, "EU-2013-1", "2013-04-11", "EU", "Germany"),
        product(txn(7, "US-2011-1", "2011-07-07", "US", "United States"), "Office Supplies", "Paper", "Staples"),
        product(txn(8, "US-2012-1", "2012-08-08", "US", "United States"), "Office Supplies", "Fasteners", "Staples"),
        product(txn(9, "AP-2011-1", "2011-09-09", "APAC", "Australia"), "Furniture", "Paper", "Staples"),
        product(txn(10, "AP-2012-1", "2012-10-10", "APAC", "Australia"), "Technology", "Phones", "Desk Phone"),
        segment(txn(11, "US-2013-1", "2013-11-11", "US", "United States"), "Corporate"),
        segment(txn(12, "AP-2013-1", "2013-12-12", "APAC", "Australia"), "Home Office"),
    ]
}

pub fn engine_with(run_id: &str, seed: u64, records: &[TransactionRecord]) -> PipelineEngine {
    let mut engine = PipelineEngine::build_test(run_id.into(), seed).expect("build test engine");
    engine.ingest(records).expect("ingest fixture");
    engine
}

pub fn run_pipeline(run_id: &str, seed: u64, records: &[TransactionRecord]) -> PipelineEngine {
    let mut engine = engine_with(run_id, seed, records);
    engine.run().expect("pipeline run");
    engine
}

pub fn header_line() -> String {
    Field::ALL.iter().map(|f| f.header()).collect::<Vec<_>>().join(",")
}

fn opt<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map(|x| x.to_string()).unwrap_or_default()
}

/// Render records as the input file, header included.
pub fn csv_text(records: &[TransactionRecord]) -> String {
    let mut out = header_line();
    out.push('\n');
    for r in records {
        let cells = [
            r.row_id.to_string(),
            r.order_id.clone(),
            r.order_date.format("%Y-%m-%d").to_string(),
            r.ship_date.format("%Y-%m-%d").to_string(),
            opt(&r.ship_mode),
            r.customer_id.clone(),
            opt(&r.customer_name),
            opt(&r.segment),
            opt(&r.city),
            opt(&r.state),
            opt(&r.country),
            opt(&r.market),
            opt(&r.region),
            r.product_id.clone(),
            opt(&r.category),
            opt(&r.sub_category),
            opt(&r.product_name),
            opt(&r.sales),
            opt(&r.quantity),
            opt(&r.discount),
            opt(&r.profit),
            opt(&r.shipping_cost),
            opt(&r.order_priority),
        ];
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}
