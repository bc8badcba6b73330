//! Reporting extract tests: surrogate key formats and measure masking.

mod common;

use common::{discount, product, run_pipeline, segment, txn};
use retail_core::{extract::write_extract, loader::TransactionRecord, types::new_run_id};

fn extract_fixture() -> Vec<TransactionRecord> {
    vec![
        txn(1, "O-1", "2012-01-05", "EU", "Germany"),
        product(txn(2, "O-2", "2012-04-30", "EU", "Austria"), "Office Supplies", "Binders", "Avery Binder"),
        segment(txn(3, "O-3", "2013-11-02", "US", "United States"), "Corporate"),
        discount(
            segment(
                product(txn(4, "O-4", "2013-11-02", "APAC", "Australia"), "Technology", "Phones", "Desk Phone"),
                "Home Office",
            ),
            0.2,
        ),
    ]
}

#[test]
fn product_keys_number_products_within_sub_category() {
    let engine = run_pipeline("dim-product", 1, &extract_fixture());
    let extract = engine.build_extract().unwrap();

    let keys: Vec<(&str, &str)> = extract
        .products
        .iter()
        .map(|p| {
            (
                p.product_name.as_deref().unwrap(),
                p.product_key.as_deref().unwrap(),
            )
        })
        .collect();
    assert!(keys.contains(&("Avery Binder", "OFF-BI-100001")), "{keys:?}");
    assert!(keys.contains(&("Binder Clips", "OFF-BI-100002")), "{keys:?}");
    assert!(keys.contains(&("Desk Phone", "TEC-PH-100001")), "{keys:?}");
}

#[test]
fn country_keys_number_countries_within_market() {
    let engine = run_pipeline("dim-country", 1, &extract_fixture());
    let extract = engine.build_extract().unwrap();

    let key = |country: &str| {
        extract
            .countries
            .iter()
            .find(|c| c.country == country)
            .and_then(|c| c.country_key.clone())
            .unwrap()
    };
    assert_eq!(key("Austria"), "EU-1001");
    assert_eq!(key("Germany"), "EU-1002");
    assert_eq!(key("United States"), "US-1001");
    assert_eq!(key("Australia"), "APAC-1001");
}

#[test]
fn segment_and_date_keys() {
    let engine = run_pipeline("dim-segment", 1, &extract_fixture());
    let extract = engine.build_extract().unwrap();

    let segments: Vec<(i64, &str)> = extract
        .segments
        .iter()
        .map(|s| (s.segment_key, s.segment.as_str()))
        .collect();
    assert_eq!(segments, vec![(1, "Consumer"), (2, "Corporate"), (3, "Home Office")]);

    assert_eq!(extract.dates.len(), 3, "dates are distinct");
    let april = extract.dates.iter().find(|d| d.date_key == 20120430).unwrap();
    assert_eq!((april.year, april.quarter, april.month, april.day), (2012, 2, 4, 30));
    let november = extract.dates.iter().find(|d| d.date_key == 20131102).unwrap();
    assert_eq!(november.quarter, 4);
}

#[test]
fn fact_rows_carry_every_key() {
    let engine = run_pipeline("fact-keys", 1, &extract_fixture());
    let extract = engine.build_extract().unwrap();
    assert_eq!(extract.facts.len(), 4);

    let phone = extract.facts.iter().find(|f| f.row_id == 4).unwrap();
    assert_eq!(phone.date_key, 20131102);
    assert_eq!(phone.segment_key, Some(3));
    assert_eq!(phone.country_key.as_deref(), Some("APAC-1001"));
    assert_eq!(phone.product_key.as_deref(), Some("TEC-PH-100001"));
    assert_eq!(phone.discount_flag, Some(1));
    assert_eq!(phone.profit, Some(10.0));

    let plain = extract.facts.iter().find(|f| f.row_id == 1).unwrap();
    assert_eq!(plain.discount_flag, Some(0));
}

#[test]
fn excluded_profit_is_blank_in_the_fact_extract() {
    let mut loss = txn(2, "O-2", "2012-02-01", "EU", "Germany");
    loss.profit = Some(-50_000.0);
    let engine = run_pipeline("fact-masked", 1, &[txn(1, "O-1", "2012-01-01", "EU", "Germany"), loss]);
    let extract = engine.build_extract().unwrap();

    assert!(extract.facts.iter().all(|f| f.profit.is_none()));
    assert!(extract.facts.iter().all(|f| f.sales.is_some()));
}

#[test]
fn extract_files_are_written_with_headers() {
    let engine = run_pipeline("write-extract", 1, &extract_fixture());
    let extract = engine.build_extract().unwrap();
    let dir = std::env::temp_dir().join(new_run_id());

    write_extract(&extract, &dir).expect("write extract");

    for table in ["dim_product", "dim_country", "dim_segment", "dim_date", "fact_sales"] {
        assert!(dir.join(format!("{table}.csv")).exists(), "{table}.csv missing");
    }
    let fact = std::fs::read_to_string(dir.join("fact_sales.csv")).unwrap();
    let header = fact.lines().next().unwrap();
    assert_eq!(
        header,
        "row_id,date_key,segment_key,country_key,product_key,sales,quantity,discount,discount_flag,profit"
    );
    assert_eq!(fact.lines().count(), 5);

    std::fs::remove_dir_all(&dir).ok();
}
