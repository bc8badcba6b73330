//! Corrector stage: hard-coded remediation allow-list.
//!
//! Rules are business decisions encoded by hand from validator output,
//! never inferred from data. Each rule is a `when` predicate (all
//! equalities) plus a `set` list of target values.
//!
//! RULES:
//!   - Match sets resolve to row ids once, before any update.
//!   - All rules of a run apply in one transaction: all or none.
//!   - Predicates key on the uncorrected value, so a second pass is a no-op.

use crate::{
    error::PipelineResult,
    event::PipelineEvent,
    rng::StageRng,
    schema::Field,
    stage::PipelineStage,
    store::PipelineStore,
    types::{RowId, RunId},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct CorrectionRule {
    pub name: &'static str,
    /// Rows must equal every (field, value) here.
    pub when: &'static [(Field, &'static str)],
    /// Target values. A row matches only if at least one differs.
    pub set: &'static [(Field, &'static str)],
}

/// The remediation allow-list.
pub const CORRECTION_RULES: &[CorrectionRule] = &[
    CorrectionRule {
        name: "austria_to_eu_market",
        when: &[(Field::Country, "Austria"), (Field::Market, "EMEA")],
        set: &[(Field::Market, "EU")],
    },
    CorrectionRule {
        name: "staples_to_fasteners",
        when: &[(Field::ProductName, "Staples")],
        set: &[
            (Field::SubCategory, "Fasteners"),
            (Field::Category, "Office Supplies"),
        ],
    },
];

/// One field change on one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub rule: String,
    pub row_id: RowId,
    pub field: Field,
    pub old_value: Option<String>,
    pub new_value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionOutcome {
    /// (rule name, distinct rows changed), in rule order.
    pub rule_rows: Vec<(String, usize)>,
    pub records: Vec<CorrectionRecord>,
}

impl CorrectionOutcome {
    pub fn rows_changed(&self) -> usize {
        self.rule_rows.iter().map(|(_, n)| n).sum()
    }

    pub fn rows_for(&self, rule: &str) -> usize {
        self.rule_rows
            .iter()
            .find(|(name, _)| name == rule)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// Resolve every rule to concrete row-level corrections against the
/// current table. Nothing is written.
pub fn plan_corrections(
    store: &PipelineStore,
    rules: &[CorrectionRule],
) -> PipelineResult<CorrectionOutcome> {
    let mut outcome = CorrectionOutcome::default();
    for rule in rules {
        let candidates = store.correction_candidates(rule.when, rule.set)?;
        for (row_id, current) in &candidates {
            for ((field, target), old) in rule.set.iter().zip(current) {
                if old.as_deref() != Some(*target) {
                    outcome.records.push(CorrectionRecord {
                        rule: rule.name.to_string(),
                        row_id: *row_id,
                        field: *field,
                        old_value: old.clone(),
                        new_value: target.to_string(),
                    });
                }
            }
        }
        outcome.rule_rows.push((rule.name.to_string(), candidates.len()));
    }
    Ok(outcome)
}

/// Plan and apply `rules` as one atomic batch.
pub fn apply_corrections(
    store: &PipelineStore,
    run_id: &str,
    rules: &[CorrectionRule],
) -> PipelineResult<CorrectionOutcome> {
    let outcome = plan_corrections(store, rules)?;
    if !outcome.records.is_empty() {
        store.apply_corrections(run_id, &outcome.records)?;
    }
    Ok(outcome)
}

pub struct CorrectorStage {
    run_id: RunId,
    rules: &'static [CorrectionRule],
    pub outcome: Option<CorrectionOutcome>,
}

impl CorrectorStage {
    pub fn new(run_id: RunId) -> Self {
        Self::with_rules(run_id, CORRECTION_RULES)
    }

    pub fn with_rules(run_id: RunId, rules: &'static [CorrectionRule]) -> Self {
        Self {
            run_id,
            rules,
            outcome: None,
        }
    }
}

impl PipelineStage for CorrectorStage {
    fn name(&self) -> &'static str {
        "corrector"
    }

    fn run(
        &mut self,
        store: &PipelineStore,
        _events_in: &[PipelineEvent],
        _rng: &mut StageRng,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let outcome = apply_corrections(store, &self.run_id, self.rules)?;
        for (rule, rows) in &outcome.rule_rows {
            log::info!("Correction rule '{rule}': {rows} row(s) changed");
        }
        self.outcome = Some(outcome.clone());
        Ok(vec![PipelineEvent::CorrectionsApplied { outcome }])
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
