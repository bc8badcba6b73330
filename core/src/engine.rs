//! The pipeline engine: runs every stage once over one batch table.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Sample                 (reproducible inspection sample)
//!   2. Profile                (raw table)
//!   3. Consistency, raw
//!   4. Corrector              (one transaction)
//!   5. Consistency, corrected
//!   6. Exclusion policy       (field registry)
//!   7. Aggregator
//!   8. Decision gates
//!
//! RULES:
//!   - Stages execute in registration order, once per run.
//!   - Each stage sees every event emitted before it this run.
//!   - No stage calls another stage's functions directly.
//!   - All randomness flows through the RngBank.
//!   - Every event is recorded in the event log.

use crate::{
    aggregate::{AggregateQuery, AggregateRow, Aggregator},
    aggregator_stage::{AggregateReport, AggregatorStage},
    config::PipelineConfig,
    consistency_stage::{CheckPhase, ConsistencyReport, ConsistencyStage},
    corrector_stage::{CorrectionOutcome, CorrectorStage},
    error::{PipelineError, PipelineResult},
    event::{EventLogEntry, PipelineEvent},
    exclusion_stage::{ExclusionStage, FieldRegistry},
    extract::{build_extract, Extract},
    gate_stage::{GateResult, GateStage, MarketClass},
    loader::{self, TransactionRecord},
    profile_stage::{DatasetProfile, ProfileStage},
    rng::{RngBank, StageSlot},
    sample_stage::SampleStage,
    stage::PipelineStage,
    store::PipelineStore,
    types::{RowId, RunId, StageSeq},
};
use std::path::Path;

/// stage_seq used for events the engine itself emits before any stage.
const ENGINE_SEQ: StageSeq = 0;

pub struct PipelineEngine {
    pub run_id:   RunId,
    pub rng_bank: RngBank,
    pub config:   PipelineConfig,
    seed:         u64,
    stages:       Vec<(StageSlot, Box<dyn PipelineStage>)>,
    store:        PipelineStore,
    events:       Vec<PipelineEvent>,
}

impl PipelineEngine {
    pub fn new(run_id: RunId, seed: u64, store: PipelineStore, config: PipelineConfig) -> Self {
        Self {
            rng_bank: RngBank::new(seed),
            config,
            seed,
            stages: Vec::new(),
            store,
            events: Vec::new(),
            run_id,
        }
    }

    /// Build a fully wired engine with all stages registered.
    /// Call this instead of new() + manual register() calls.
    pub fn build(run_id: RunId, seed: u64, store: PipelineStore, config: PipelineConfig) -> Self {
        let mut engine = PipelineEngine::new(run_id.clone(), seed, store, config);
        let cleaning = engine.config.cleaning.clone();
        let gates = engine.config.gates.clone();

        // EXECUTION ORDER: fixed, documented, never reordered.
        engine.register(
            StageSlot::Sample,
            Box::new(SampleStage::new(run_id.clone(), cleaning.sample_size)),
        );
        engine.register(StageSlot::Profile, Box::new(ProfileStage::new()));
        engine.register(
            StageSlot::Consistency,
            Box::new(ConsistencyStage::new(CheckPhase::Raw)),
        );
        engine.register(
            StageSlot::Correction,
            Box::new(CorrectorStage::new(run_id.clone())),
        );
        engine.register(
            StageSlot::Consistency,
            Box::new(ConsistencyStage::new(CheckPhase::Corrected)),
        );
        engine.register(
            StageSlot::Exclusion,
            Box::new(ExclusionStage::new(run_id.clone(), cleaning.anomaly_checks.clone())),
        );
        engine.register(StageSlot::Aggregate, Box::new(AggregatorStage::new(cleaning)));
        engine.register(StageSlot::Gate, Box::new(GateStage::new(run_id, gates)));
        engine
    }

    /// In-memory, migrated, default-configured engine for tests.
    pub fn build_test(run_id: RunId, seed: u64) -> PipelineResult<Self> {
        let store = PipelineStore::in_memory()?;
        store.migrate()?;
        store.insert_run(&run_id, seed, "test", "in-memory")?;
        Ok(Self::build(run_id, seed, store, PipelineConfig::default_test()))
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, slot: StageSlot, stage: Box<dyn PipelineStage>) {
        self.stages.push((slot, stage));
    }

    /// Insert parsed records into the batch table in one transaction.
    pub fn ingest(&mut self, records: &[TransactionRecord]) -> PipelineResult<usize> {
        self.initialize()?;
        let rows = self.store.insert_transactions(records)?;
        self.emit(ENGINE_SEQ, "loader", vec![PipelineEvent::DatasetLoaded { rows }])?;
        log::info!("Ingested {rows} row(s) into run {}", self.run_id);
        Ok(rows)
    }

    /// Parse `path` and ingest it. A file that fails to parse writes nothing.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> PipelineResult<usize> {
        let records = loader::load_file(path)?;
        self.ingest(&records)
    }

    /// Run every registered stage once, in order.
    pub fn run(&mut self) -> PipelineResult<&[PipelineEvent]> {
        self.initialize()?;
        for (idx, (slot, stage)) in self.stages.iter_mut().enumerate() {
            let seq = idx as StageSeq + 1;
            let mut rng = self.rng_bank.for_stage(*slot);
            log::debug!("Running stage {} (seq {seq}, rng stream {})", stage.name(), rng.name);
            let mut new_events = stage.run(&self.store, &self.events, &mut rng)?;
            new_events.push(PipelineEvent::StageCompleted {
                stage: stage.name().to_string(),
            });
            for event in &new_events {
                record(&self.store, &self.run_id, seq, stage.name(), event)?;
            }
            log::debug!("Stage {} emitted {} event(s)", stage.name(), new_events.len());
            self.events.extend(new_events);
        }
        Ok(&self.events)
    }

    /// Run one named stage again against the current table.
    pub fn rerun_stage(&mut self, name: &str) -> PipelineResult<Vec<PipelineEvent>> {
        let idx = self
            .stages
            .iter()
            .position(|(_, s)| s.name() == name)
            .ok_or_else(|| PipelineError::StageNotFound {
                name: name.to_string(),
            })?;
        let (slot, stage) = &mut self.stages[idx];
        let mut rng = self.rng_bank.for_stage(*slot);
        let new_events = stage.run(&self.store, &self.events, &mut rng)?;
        for event in &new_events {
            record(&self.store, &self.run_id, idx as StageSeq + 1, stage.name(), event)?;
        }
        self.events.extend(new_events.iter().cloned());
        Ok(new_events)
    }

    fn initialize(&mut self) -> PipelineResult<()> {
        // Emit RunInitialized once so seed differences are observable.
        if self.events.is_empty() {
            let init = PipelineEvent::RunInitialized {
                run_id: self.run_id.clone(),
                seed: self.seed,
            };
            self.emit(ENGINE_SEQ, "engine", vec![init])?;
        }
        Ok(())
    }

    fn emit(&mut self, seq: StageSeq, stage: &str, events: Vec<PipelineEvent>) -> PipelineResult<()> {
        for event in &events {
            record(&self.store, &self.run_id, seq, stage, event)?;
        }
        self.events.extend(events);
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    pub fn events(&self) -> &[PipelineEvent] {
        &self.events
    }

    pub fn store_events_for_run(&self) -> PipelineResult<Vec<EventLogEntry>> {
        self.store.events_for_run(&self.run_id)
    }

    fn stage<T: 'static>(&self) -> Option<&T> {
        self.stages
            .iter()
            .find_map(|(_, s)| s.as_any().downcast_ref::<T>())
    }

    pub fn sample_row_ids(&self) -> Option<&[RowId]> {
        self.stage::<SampleStage>().map(|s| s.row_ids.as_slice())
    }

    pub fn profile(&self) -> Option<&DatasetProfile> {
        self.stage::<ProfileStage>()?.profile.as_ref()
    }

    pub fn consistency_report(&self, phase: CheckPhase) -> Option<&ConsistencyReport> {
        self.stages
            .iter()
            .filter_map(|(_, s)| s.as_any().downcast_ref::<ConsistencyStage>())
            .find(|s| s.phase == phase)?
            .report
            .as_ref()
    }

    pub fn correction_outcome(&self) -> Option<&CorrectionOutcome> {
        self.stage::<CorrectorStage>()?.outcome.as_ref()
    }

    pub fn field_registry(&self) -> Option<&FieldRegistry> {
        self.stage::<ExclusionStage>()?.registry.as_ref()
    }

    pub fn aggregate_report(&self) -> Option<&AggregateReport> {
        self.stage::<AggregatorStage>()?.report.as_ref()
    }

    pub fn gate_results(&self) -> &[GateResult] {
        self.stage::<GateStage>()
            .map(|g| g.results.as_slice())
            .unwrap_or_default()
    }

    pub fn market_classes(&self) -> &[(String, MarketClass)] {
        self.stage::<GateStage>()
            .map(|g| g.markets.as_slice())
            .unwrap_or_default()
    }

    /// Ad hoc aggregate query under the run's field registry. Before the
    /// exclusion stage has run every field counts as included.
    pub fn query(&self, query: &AggregateQuery) -> PipelineResult<Vec<AggregateRow>> {
        let registry = self.field_registry().cloned().unwrap_or_default();
        Aggregator::new(&self.store, &registry, &self.config.cleaning).aggregate(query)
    }

    pub fn build_extract(&self) -> PipelineResult<Extract> {
        let registry = self.field_registry().cloned().unwrap_or_default();
        build_extract(&self.store, &registry)
    }
}

fn record(
    store: &PipelineStore,
    run_id: &str,
    seq: StageSeq,
    stage: &str,
    event: &PipelineEvent,
) -> PipelineResult<()> {
    let entry = EventLogEntry {
        id:         None,
        run_id:     run_id.to_string(),
        stage_seq:  seq,
        stage:      stage.to_string(),
        event_type: event.type_name().to_string(),
        payload:    serde_json::to_string(event)?,
    };
    store.append_event(&entry)
}
