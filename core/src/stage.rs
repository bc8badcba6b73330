//! Stage trait.
//!
//! RULE: Every pipeline component implements PipelineStage.
//! The engine calls run() on each registered stage exactly once,
//! in registration order. Execution order is fixed and documented
//! in engine.rs.

use crate::{
    error::PipelineResult,
    event::PipelineEvent,
    rng::StageRng,
    store::PipelineStore,
};
use std::any::Any;

/// The contract every stage must fulfill.
pub trait PipelineStage {
    /// Unique stable name for this stage.
    fn name(&self) -> &'static str;

    /// Called once per run by the engine.
    ///
    /// - `store`:     the batch table and run bookkeeping
    /// - `events_in`: events emitted by earlier stages this run
    /// - `rng`:       this stage's deterministic RNG
    ///
    /// Returns the events this stage adds to the run's log.
    fn run(
        &mut self,
        store: &PipelineStore,
        events_in: &[PipelineEvent],
        rng: &mut StageRng,
    ) -> PipelineResult<Vec<PipelineEvent>>;

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}
