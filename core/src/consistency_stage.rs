//! Consistency validator stage: hierarchy and duplicate-row checks.
//!
//! One algorithm covers every hierarchy pair: (parent P, child C) is
//! consistent iff count_distinct(C) == count_distinct(concat(P, C)).
//! The validator only reports. Every violation becomes a
//! `ConsistencyViolation` finding for a human to encode as a rule.
//!
//! Registered twice: once on the raw table, once after correction.

use crate::{
    error::PipelineResult,
    event::{Finding, PipelineEvent},
    rng::StageRng,
    schema::Field,
    stage::PipelineStage,
    store::PipelineStore,
    types::RowId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyPair {
    pub parent: Field,
    pub child: Field,
}

/// Every pair the validator checks, in report order.
pub const HIERARCHY_PAIRS: [HierarchyPair; 5] = [
    HierarchyPair { parent: Field::Market,      child: Field::Country },
    HierarchyPair { parent: Field::Category,    child: Field::SubCategory },
    HierarchyPair { parent: Field::SubCategory, child: Field::ProductName },
    HierarchyPair { parent: Field::CustomerId,  child: Field::CustomerName },
    HierarchyPair { parent: Field::ProductId,   child: Field::ProductName },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPhase {
    Raw,
    Corrected,
}

/// A child value that maps to more than one parent value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffendingChild {
    pub child_value: String,
    pub parents: Vec<String>,
    pub row_ids: Vec<RowId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyCheck {
    pub pair: HierarchyPair,
    pub distinct_children: i64,
    pub distinct_pairs: i64,
    pub offending: Vec<OffendingChild>,
}

impl HierarchyCheck {
    /// Number of surplus (parent, child) combinations.
    pub fn inconsistent(&self) -> i64 {
        (self.distinct_pairs - self.distinct_children).max(0)
    }

    pub fn is_consistent(&self) -> bool {
        self.inconsistent() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub hierarchies: Vec<HierarchyCheck>,
    /// Row-id groups identical in every other column.
    pub duplicates: Vec<Vec<RowId>>,
}

impl ConsistencyReport {
    pub fn check(&self, parent: Field, child: Field) -> Option<&HierarchyCheck> {
        self.hierarchies
            .iter()
            .find(|h| h.pair.parent == parent && h.pair.child == child)
    }

    pub fn violation_count(&self) -> usize {
        self.hierarchies.iter().filter(|h| !h.is_consistent()).count() + self.duplicates.len()
    }

    pub fn findings(&self) -> Vec<Finding> {
        let mut findings: Vec<Finding> = self
            .hierarchies
            .iter()
            .filter(|h| !h.is_consistent())
            .map(|h| Finding::ConsistencyViolation {
                parent: h.pair.parent,
                child: h.pair.child,
                inconsistent: h.inconsistent(),
            })
            .collect();
        findings.extend(
            self.duplicates
                .iter()
                .map(|ids| Finding::DuplicateRows { row_ids: ids.clone() }),
        );
        findings
    }
}

/// Run the hierarchy check for one pair.
pub fn check_hierarchy(store: &PipelineStore, pair: HierarchyPair) -> PipelineResult<HierarchyCheck> {
    let (distinct_children, distinct_pairs) = store.hierarchy_counts(pair.parent, pair.child)?;

    let mut by_child: BTreeMap<String, OffendingChild> = BTreeMap::new();
    for (child_value, parent_value, row_id) in store.hierarchy_offenders(pair.parent, pair.child)? {
        let entry = by_child
            .entry(child_value.clone())
            .or_insert_with(|| OffendingChild {
                child_value,
                parents: Vec::new(),
                row_ids: Vec::new(),
            });
        if !entry.parents.contains(&parent_value) {
            entry.parents.push(parent_value);
        }
        entry.row_ids.push(row_id);
    }

    Ok(HierarchyCheck {
        pair,
        distinct_children,
        distinct_pairs,
        offending: by_child.into_values().collect(),
    })
}

/// Run every hierarchy check plus the duplicate-row check.
pub fn validate(store: &PipelineStore) -> PipelineResult<ConsistencyReport> {
    let hierarchies = HIERARCHY_PAIRS
        .iter()
        .map(|pair| check_hierarchy(store, *pair))
        .collect::<PipelineResult<Vec<_>>>()?;
    let duplicates = store.duplicate_groups()?;
    Ok(ConsistencyReport {
        hierarchies,
        duplicates,
    })
}

pub struct ConsistencyStage {
    pub phase: CheckPhase,
    pub report: Option<ConsistencyReport>,
}

impl ConsistencyStage {
    pub fn new(phase: CheckPhase) -> Self {
        Self {
            phase,
            report: None,
        }
    }
}

impl PipelineStage for ConsistencyStage {
    fn name(&self) -> &'static str {
        match self.phase {
            CheckPhase::Raw => "consistency_raw",
            CheckPhase::Corrected => "consistency_corrected",
        }
    }

    fn run(
        &mut self,
        store: &PipelineStore,
        _events_in: &[PipelineEvent],
        _rng: &mut StageRng,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let report = validate(store)?;

        let mut events = Vec::new();
        for finding in report.findings() {
            match &finding {
                Finding::ConsistencyViolation { parent, child, inconsistent } => log::warn!(
                    "[{:?}] {parent} -> {child}: {inconsistent} inconsistent combination(s)",
                    self.phase
                ),
                Finding::DuplicateRows { row_ids } => {
                    log::warn!("[{:?}] duplicate rows {:?}", self.phase, row_ids)
                }
                Finding::UnresolvableAnomaly { .. } => {}
            }
            events.push(PipelineEvent::FindingRaised { finding });
        }
        log::info!(
            "Consistency check ({:?}): {} violation(s)",
            self.phase,
            report.violation_count()
        );

        self.report = Some(report.clone());
        events.insert(
            0,
            PipelineEvent::ConsistencyChecked {
                phase: self.phase,
                report,
            },
        );
        Ok(events)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
