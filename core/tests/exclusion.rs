//! Exclusion policy tests: registry metadata, findings, aggregator guard.

mod common;

use common::{run_pipeline, sales, txn};
use retail_core::{
    aggregate::{AggFunc, AggregateQuery, Dimension},
    error::PipelineError,
    event::{Finding, PipelineEvent},
    exclusion_stage::FieldStatus,
    loader::TransactionRecord,
    schema::Field,
};

fn with_profit(mut r: TransactionRecord, profit: f64) -> TransactionRecord {
    r.profit = Some(profit);
    r
}

#[test]
fn deep_negative_profit_is_excluded_anomalous() {
    let records = vec![
        sales(txn(1, "O-1", "2012-01-01", "EU", "Germany"), 10.0),
        with_profit(sales(txn(2, "O-2", "2012-02-01", "EU", "Germany"), 50.0), -5_000.0),
        sales(txn(3, "O-3", "2012-03-01", "US", "United States"), 80.0),
    ];
    let engine = run_pipeline("anomalous-profit", 3, &records);
    let registry = engine.field_registry().expect("exclusion stage ran");

    assert_eq!(registry.status(Field::Profit), FieldStatus::ExcludedAnomalous);
    assert_eq!(registry.excluded(), vec![Field::Profit]);
    assert!(engine.events().iter().any(|e| matches!(
        e,
        PipelineEvent::FindingRaised {
            finding: Finding::UnresolvableAnomaly { field: Field::Profit, .. }
        }
    )));

    let persisted = engine.store().excluded_fields("anomalous-profit").unwrap();
    assert_eq!(persisted, vec![(Field::Profit, FieldStatus::ExcludedAnomalous)]);
}

#[test]
fn shallow_negative_profit_stays_included() {
    let records = vec![
        sales(txn(1, "O-1", "2012-01-01", "EU", "Germany"), 10.0),
        with_profit(txn(2, "O-2", "2012-02-01", "EU", "Germany"), -50.0),
    ];
    let engine = run_pipeline("shallow-loss", 3, &records);
    assert!(engine.field_registry().unwrap().is_included(Field::Profit));
}

#[test]
fn negative_sales_minimum_widens_the_profit_floor() {
    // min(sales) = -5 gives a floor of -500 at the default multiple of 100.
    let records = vec![
        sales(txn(1, "O-1", "2012-01-01", "EU", "Germany"), -5.0),
        with_profit(txn(2, "O-2", "2012-02-01", "EU", "Germany"), -50.0),
    ];
    let engine = run_pipeline("returns-floor", 3, &records);
    assert!(
        engine.field_registry().unwrap().is_included(Field::Profit),
        "a small loss is not anomalous just because sales went negative"
    );
}

#[test]
fn excluded_measure_is_rejected_but_still_inspectable() {
    let records = vec![
        sales(txn(1, "O-1", "2012-01-01", "EU", "Germany"), 10.0),
        with_profit(txn(2, "O-2", "2012-02-01", "EU", "Germany"), -5_000.0),
    ];
    let engine = run_pipeline("excluded-guard", 3, &records);

    let query = AggregateQuery::new(vec![Dimension::Field(Field::Market)], Field::Profit, AggFunc::Sum);
    let err = engine.query(&query).unwrap_err();
    assert!(
        matches!(err, PipelineError::ExcludedField { ref field, .. } if field == "profit"),
        "Expected ExcludedField, got {err:?}"
    );

    let row = engine.store().get_transaction(2).unwrap().unwrap();
    assert_eq!(row.profit, Some(-5_000.0), "excluded values stay in the table");
}

#[test]
fn unreconciled_customer_ids_are_excluded_ambiguous() {
    let mut second_id = txn(2, "O-2", "2012-02-01", "EU", "Germany");
    second_id.customer_id = "AB-99999".into();
    let records = vec![txn(1, "O-1", "2012-01-01", "EU", "Germany"), second_id];
    let engine = run_pipeline("ambiguous-customer", 3, &records);
    let registry = engine.field_registry().unwrap();

    assert_eq!(registry.status(Field::CustomerId), FieldStatus::ExcludedAmbiguous);
    assert!(registry.is_included(Field::CustomerName), "only the designated field is excluded");

    let by_customer = AggregateQuery::new(
        vec![Dimension::Field(Field::CustomerId)],
        Field::Sales,
        AggFunc::Sum,
    );
    assert!(matches!(
        engine.query(&by_customer),
        Err(PipelineError::ExcludedField { .. })
    ));
}

#[test]
fn clean_data_excludes_nothing() {
    let engine = run_pipeline("clean", 3, &common::dirty_fixture());
    assert!(
        engine.field_registry().unwrap().excluded().is_empty(),
        "corrections resolve every known inconsistency"
    );
}
