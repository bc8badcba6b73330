//! Consistency validator and corrector tests.

mod common;

use common::{dirty_fixture, engine_with, run_pipeline, txn};
use retail_core::{
    consistency_stage::{validate, CheckPhase},
    corrector_stage::{plan_corrections, CorrectionRecord, CORRECTION_RULES},
    error::PipelineError,
    event::{Finding, PipelineEvent},
    schema::Field,
};

#[test]
fn raw_check_reports_the_known_dirty_mappings() {
    let engine = engine_with("raw-check", 1, &dirty_fixture());
    let report = validate(engine.store()).unwrap();

    let market = report.check(Field::Market, Field::Country).unwrap();
    assert_eq!(market.distinct_children, 5);
    assert_eq!(market.distinct_pairs, 6);
    assert_eq!(market.inconsistent(), 1);
    assert_eq!(market.offending.len(), 1);
    assert_eq!(market.offending[0].child_value, "Austria");
    assert_eq!(market.offending[0].parents, vec!["EMEA", "EU"]);
    assert_eq!(market.offending[0].row_ids, vec![2, 3, 1]);

    let staples = report.check(Field::SubCategory, Field::ProductName).unwrap();
    assert_eq!(staples.inconsistent(), 1);
    let paper = report.check(Field::Category, Field::SubCategory).unwrap();
    assert_eq!(paper.inconsistent(), 1);

    assert!(report.check(Field::CustomerId, Field::CustomerName).unwrap().is_consistent());
    assert!(report.check(Field::ProductId, Field::ProductName).unwrap().is_consistent());
    assert!(report.duplicates.is_empty());
}

#[test]
fn violations_are_findings_not_errors() {
    let engine = run_pipeline("findings", 1, &dirty_fixture());
    let violations = engine
        .events()
        .iter()
        .filter(|e| {
            matches!(
                e,
                PipelineEvent::FindingRaised {
                    finding: Finding::ConsistencyViolation { .. }
                }
            )
        })
        .count();
    assert_eq!(violations, 3, "three raw violations, none after correction");
}

/// Post-correction zero inconsistencies for the remediated keys.
#[test]
fn corrected_check_is_clean() {
    let engine = run_pipeline("corrected-check", 1, &dirty_fixture());
    let raw = engine.consistency_report(CheckPhase::Raw).unwrap();
    let fixed = engine.consistency_report(CheckPhase::Corrected).unwrap();

    assert_eq!(raw.violation_count(), 3);
    assert_eq!(fixed.violation_count(), 0, "corrected report: {fixed:?}");
    assert!(fixed.check(Field::Market, Field::Country).unwrap().is_consistent());
    assert!(fixed.check(Field::SubCategory, Field::ProductName).unwrap().is_consistent());
}

#[test]
fn austria_moves_to_eu_and_france_stays_emea() {
    let engine = run_pipeline("austria", 1, &dirty_fixture());
    let store = engine.store();

    assert_eq!(
        store.distinct_values_where(Field::Market, Field::Country, "Austria").unwrap(),
        vec!["EU"]
    );
    assert_eq!(
        store.distinct_values_where(Field::Market, Field::Country, "France").unwrap(),
        vec!["EMEA"]
    );
    assert_eq!(engine.correction_outcome().unwrap().rows_for("austria_to_eu_market"), 2);
}

#[test]
fn staples_fully_reassigned() {
    let engine = run_pipeline("staples", 1, &dirty_fixture());
    let store = engine.store();

    assert_eq!(
        store.distinct_values_where(Field::SubCategory, Field::ProductName, "Staples").unwrap(),
        vec!["Fasteners"]
    );
    assert_eq!(
        store.distinct_values_where(Field::Category, Field::ProductName, "Staples").unwrap(),
        vec!["Office Supplies"]
    );
    // Row 8 was already correct and is left alone.
    assert_eq!(engine.correction_outcome().unwrap().rows_for("staples_to_fasteners"), 2);
}

#[test]
fn every_change_is_audited() {
    let engine = run_pipeline("audit", 1, &dirty_fixture());
    let audit = engine.store().correction_audit("audit").unwrap();

    // Austria: 2 market changes. Staples: row 7 sub-category, row 9 both.
    assert_eq!(audit.len(), 5);
    let row9: Vec<_> = audit.iter().filter(|a| a.row_id == 9).collect();
    assert_eq!(row9.len(), 2);
    assert!(row9
        .iter()
        .any(|a| a.field == "category" && a.old_value.as_deref() == Some("Furniture")));
    assert!(audit
        .iter()
        .all(|a| a.rule == "austria_to_eu_market" || a.rule == "staples_to_fasteners"));
}

#[test]
fn corrector_is_idempotent() {
    let mut engine = run_pipeline("idempotent", 1, &dirty_fixture());
    let events = engine.rerun_stage("corrector").unwrap();

    let outcome = events
        .iter()
        .find_map(|e| match e {
            PipelineEvent::CorrectionsApplied { outcome } => Some(outcome),
            _ => None,
        })
        .expect("corrector emits its outcome");
    assert_eq!(outcome.rows_changed(), 0, "second pass must find no rows");
    assert!(outcome.records.is_empty());
    assert_eq!(engine.store().correction_audit("idempotent").unwrap().len(), 5);
}

#[test]
fn planning_writes_nothing() {
    let engine = engine_with("plan-only", 1, &dirty_fixture());
    let plan = plan_corrections(engine.store(), CORRECTION_RULES).unwrap();
    assert_eq!(plan.records.len(), 5);
    assert_eq!(engine.store().count_where(Field::Market, "EMEA").unwrap(), 4);
}

#[test]
fn failed_batch_leaves_table_and_audit_untouched() {
    let engine = engine_with("atomic", 1, &dirty_fixture());
    let batch = vec![
        CorrectionRecord {
            rule: "austria_to_eu_market".into(),
            row_id: 2,
            field: Field::Market,
            old_value: Some("EMEA".into()),
            new_value: "EU".into(),
        },
        CorrectionRecord {
            rule: "austria_to_eu_market".into(),
            row_id: 999,
            field: Field::Market,
            old_value: Some("EMEA".into()),
            new_value: "EU".into(),
        },
    ];

    let result = engine.store().apply_corrections("atomic", &batch);
    assert!(result.is_err(), "a record targeting a missing row fails the batch");

    let row2 = engine.store().get_transaction(2).unwrap().unwrap();
    assert_eq!(row2.market.as_deref(), Some("EMEA"), "first update must be rolled back");
    assert!(engine.store().correction_audit("atomic").unwrap().is_empty());
}

#[test]
fn unknown_stage_is_reported() {
    let mut engine = engine_with("no-stage", 1, &dirty_fixture());
    let err = engine.rerun_stage("forecaster").unwrap_err();
    assert!(matches!(err, PipelineError::StageNotFound { ref name } if name == "forecaster"));
}

#[test]
fn duplicate_rows_are_reported_with_their_ids() {
    let records = vec![
        txn(1, "O-1", "2012-01-01", "EU", "Germany"),
        txn(2, "O-1", "2012-01-01", "EU", "Germany"),
        txn(3, "O-2", "2012-01-02", "EU", "Germany"),
    ];
    let engine = run_pipeline("dupes", 1, &records);
    let report = engine.consistency_report(CheckPhase::Raw).unwrap();
    assert_eq!(report.duplicates, vec![vec![1, 2]]);
    assert!(engine.events().iter().any(|e| matches!(
        e,
        PipelineEvent::FindingRaised {
            finding: Finding::DuplicateRows { .. }
        }
    )));
}
