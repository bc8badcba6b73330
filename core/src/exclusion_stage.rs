//! Exclusion policy stage: field registry.
//!
//! A field that cannot be reconciled is tagged excluded, never dropped.
//! Excluded fields may not be used as a grouping key or measure by the
//! aggregator, but stay queryable through the store for inspection.
//!
//! Inputs (from events): the raw profile and the post-correction
//! consistency report.

use crate::{
    config::AnomalyCheck,
    consistency_stage::{CheckPhase, ConsistencyReport, HierarchyPair},
    error::{PipelineError, PipelineResult},
    event::{Finding, PipelineEvent},
    profile_stage::DatasetProfile,
    rng::StageRng,
    schema::Field,
    stage::PipelineStage,
    store::PipelineStore,
    types::RunId,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Included,
    /// Mapping to its paired field is many-to-one and no finite rule fixes it.
    ExcludedAmbiguous,
    /// Extreme, unexplained values relative to a paired field.
    ExcludedAnomalous,
}

impl FieldStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldStatus::Included          => "included",
            FieldStatus::ExcludedAmbiguous => "excluded_ambiguous",
            FieldStatus::ExcludedAnomalous => "excluded_anomalous",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "included"           => Some(FieldStatus::Included),
            "excluded_ambiguous" => Some(FieldStatus::ExcludedAmbiguous),
            "excluded_anomalous" => Some(FieldStatus::ExcludedAnomalous),
            _ => None,
        }
    }

    pub fn is_excluded(self) -> bool {
        self != FieldStatus::Included
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub field: Field,
    pub status: FieldStatus,
    pub reason: Option<String>,
}

/// Inclusion status of every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRegistry {
    entries: Vec<FieldEntry>,
}

impl FieldRegistry {
    pub fn all_included() -> Self {
        Self {
            entries: Field::ALL
                .iter()
                .map(|f| FieldEntry {
                    field: *f,
                    status: FieldStatus::Included,
                    reason: None,
                })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[FieldEntry] {
        &self.entries
    }

    pub fn status(&self, field: Field) -> FieldStatus {
        self.entries
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.status)
            .unwrap_or(FieldStatus::Included)
    }

    pub fn is_included(&self, field: Field) -> bool {
        !self.status(field).is_excluded()
    }

    /// Tag `field` excluded. The first exclusion of a field wins.
    pub fn exclude(&mut self, field: Field, status: FieldStatus, reason: impl Into<String>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.field == field) {
            if !entry.status.is_excluded() {
                entry.status = status;
                entry.reason = Some(reason.into());
            }
        }
    }

    pub fn excluded(&self) -> Vec<Field> {
        self.entries
            .iter()
            .filter(|e| e.status.is_excluded())
            .map(|e| e.field)
            .collect()
    }

    /// Error with `ExcludedField` unless `field` may be aggregated.
    pub fn require_included(&self, field: Field) -> PipelineResult<()> {
        match self.status(field) {
            FieldStatus::Included => Ok(()),
            status => Err(PipelineError::ExcludedField {
                field: field.column().to_string(),
                status: status.to_string(),
            }),
        }
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::all_included()
    }
}

/// Which field to exclude when a hierarchy pair is still inconsistent
/// after correction.
#[derive(Debug, Clone, Copy)]
pub struct AmbiguityRule {
    pub pair: HierarchyPair,
    pub exclude: Field,
}

pub const AMBIGUITY_RULES: [AmbiguityRule; 5] = [
    AmbiguityRule {
        pair: HierarchyPair { parent: Field::CustomerId, child: Field::CustomerName },
        exclude: Field::CustomerId,
    },
    AmbiguityRule {
        pair: HierarchyPair { parent: Field::ProductId, child: Field::ProductName },
        exclude: Field::ProductId,
    },
    AmbiguityRule {
        pair: HierarchyPair { parent: Field::Market, child: Field::Country },
        exclude: Field::Country,
    },
    AmbiguityRule {
        pair: HierarchyPair { parent: Field::Category, child: Field::SubCategory },
        exclude: Field::SubCategory,
    },
    AmbiguityRule {
        pair: HierarchyPair { parent: Field::SubCategory, child: Field::ProductName },
        exclude: Field::ProductName,
    },
];

/// Describe why `check.measure` is anomalous, or None if it is not.
/// The floor scales with the magnitude of the reference minimum, so a
/// negative reference (returns) widens it rather than collapsing it to 0.
pub fn anomaly_detail(profile: &DatasetProfile, check: &AnomalyCheck) -> Option<String> {
    let measure_min = profile.get(check.measure)?.min?;
    let reference_min = profile.get(check.reference)?.min?;
    let floor = -(check.multiple * reference_min.abs());
    (measure_min < 0.0 && measure_min < floor).then(|| {
        format!(
            "min {} = {measure_min:.2} is below {:.0}x min {} ({reference_min:.2})",
            check.measure, check.multiple, check.reference
        )
    })
}

/// Derive the registry from the profile and the post-correction report.
pub fn build_registry(
    profile: Option<&DatasetProfile>,
    report: Option<&ConsistencyReport>,
    checks: &[AnomalyCheck],
) -> (FieldRegistry, Vec<Finding>) {
    let mut registry = FieldRegistry::all_included();
    let mut findings = Vec::new();

    if let Some(report) = report {
        for rule in &AMBIGUITY_RULES {
            let Some(check) = report.check(rule.pair.parent, rule.pair.child) else {
                continue;
            };
            if check.is_consistent() || !registry.is_included(rule.exclude) {
                continue;
            }
            let detail = format!(
                "{} -> {} has {} unresolved combination(s)",
                rule.pair.parent,
                rule.pair.child,
                check.inconsistent()
            );
            registry.exclude(rule.exclude, FieldStatus::ExcludedAmbiguous, detail.clone());
            findings.push(Finding::UnresolvableAnomaly {
                field: rule.exclude,
                status: FieldStatus::ExcludedAmbiguous,
                detail,
            });
        }
    }

    if let Some(profile) = profile {
        for check in checks {
            if !registry.is_included(check.measure) {
                continue;
            }
            if let Some(detail) = anomaly_detail(profile, check) {
                registry.exclude(check.measure, FieldStatus::ExcludedAnomalous, detail.clone());
                findings.push(Finding::UnresolvableAnomaly {
                    field: check.measure,
                    status: FieldStatus::ExcludedAnomalous,
                    detail,
                });
            }
        }
    }

    (registry, findings)
}

pub struct ExclusionStage {
    run_id: RunId,
    checks: Vec<AnomalyCheck>,
    pub registry: Option<FieldRegistry>,
}

impl ExclusionStage {
    pub fn new(run_id: RunId, checks: Vec<AnomalyCheck>) -> Self {
        Self {
            run_id,
            checks,
            registry: None,
        }
    }
}

impl PipelineStage for ExclusionStage {
    fn name(&self) -> &'static str {
        "exclusion"
    }

    fn run(
        &mut self,
        store: &PipelineStore,
        events_in: &[PipelineEvent],
        _rng: &mut StageRng,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let profile = events_in.iter().rev().find_map(|e| match e {
            PipelineEvent::ProfileCompleted { profile } => Some(profile),
            _ => None,
        });
        // Prefer the post-correction report; fall back to the raw one.
        let corrected = events_in.iter().rev().find_map(|e| match e {
            PipelineEvent::ConsistencyChecked { phase: CheckPhase::Corrected, report } => {
                Some(report)
            }
            _ => None,
        });
        let report = corrected.or_else(|| {
            events_in.iter().rev().find_map(|e| match e {
                PipelineEvent::ConsistencyChecked { report, .. } => Some(report),
                _ => None,
            })
        });
        if profile.is_none() || report.is_none() {
            log::warn!("Exclusion policy ran without a profile or consistency report");
        }

        let (registry, findings) = build_registry(profile, report, &self.checks);
        store.save_field_registry(&self.run_id, &registry)?;

        let mut events: Vec<PipelineEvent> = findings
            .into_iter()
            .map(|finding| {
                if let Finding::UnresolvableAnomaly { field, status, detail } = &finding {
                    log::warn!("Excluding {field} ({status}): {detail}");
                }
                PipelineEvent::FindingRaised { finding }
            })
            .collect();
        log::info!("Field registry: {} field(s) excluded", registry.excluded().len());

        self.registry = Some(registry.clone());
        events.push(PipelineEvent::FieldRegistryBuilt { registry });
        Ok(events)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
