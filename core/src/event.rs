//! The event bus: all inter-stage communication.
//!
//! RULE: Stages communicate ONLY through events.
//! A stage never calls another stage's functions and never reads
//! another stage's internal state. Named result sets (profile,
//! consistency report, field registry, aggregate report) travel as
//! event payloads instead of shared staging tables.

use crate::{
    aggregator_stage::AggregateReport,
    consistency_stage::{CheckPhase, ConsistencyReport},
    corrector_stage::CorrectionOutcome,
    exclusion_stage::{FieldRegistry, FieldStatus},
    gate_stage::{GateResult, MarketClass},
    profile_stage::DatasetProfile,
    schema::Field,
    types::{RowId, RunId, StageSeq},
};
use serde::{Deserialize, Serialize};

/// Every event emitted during a run.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Engine events ──────────────────────────────
    RunInitialized {
        run_id: RunId,
        seed: u64,
    },
    DatasetLoaded {
        rows: usize,
    },
    StageCompleted {
        stage: String,
    },

    // ── Loader ─────────────────────────────────────
    SampleMaterialized {
        rows: usize,
        reused: bool,
    },

    // ── Diagnostics ────────────────────────────────
    ProfileCompleted {
        profile: DatasetProfile,
    },
    ConsistencyChecked {
        phase: CheckPhase,
        report: ConsistencyReport,
    },
    FindingRaised {
        finding: Finding,
    },

    // ── Cleaning ───────────────────────────────────
    CorrectionsApplied {
        outcome: CorrectionOutcome,
    },
    FieldRegistryBuilt {
        registry: FieldRegistry,
    },

    // ── Reporting ──────────────────────────────────
    AggregatesComputed {
        report: AggregateReport,
    },
    GateEvaluated {
        result: GateResult,
    },
    MarketClassified {
        market: String,
        class: MarketClass,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            PipelineEvent::RunInitialized { .. }     => "run_initialized",
            PipelineEvent::DatasetLoaded { .. }      => "dataset_loaded",
            PipelineEvent::StageCompleted { .. }     => "stage_completed",
            PipelineEvent::SampleMaterialized { .. } => "sample_materialized",
            PipelineEvent::ProfileCompleted { .. }   => "profile_completed",
            PipelineEvent::ConsistencyChecked { .. } => "consistency_checked",
            PipelineEvent::FindingRaised { .. }      => "finding_raised",
            PipelineEvent::CorrectionsApplied { .. } => "corrections_applied",
            PipelineEvent::FieldRegistryBuilt { .. } => "field_registry_built",
            PipelineEvent::AggregatesComputed { .. } => "aggregates_computed",
            PipelineEvent::GateEvaluated { .. }      => "gate_evaluated",
            PipelineEvent::MarketClassified { .. }   => "market_classified",
        }
    }
}

/// Non-fatal data-quality findings. Reported, never auto-resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// A child value maps to more than one parent value.
    ConsistencyViolation {
        parent: Field,
        child: Field,
        inconsistent: i64,
    },
    /// Rows identical in every column except the row id.
    DuplicateRows {
        row_ids: Vec<RowId>,
    },
    /// An irregularity no available field can correct; the field is excluded.
    UnresolvableAnomaly {
        field: Field,
        status: FieldStatus,
        detail: String,
    },
}

/// A persisted event log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub run_id: RunId,
    pub stage_seq: StageSeq,
    pub stage: String,
    pub event_type: String,
    pub payload: String,
}
