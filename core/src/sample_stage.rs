//! Sample stage: reproducible inspection sample.
//!
//! The sample is drawn once per run from the stage's seeded RNG and
//! materialized in `sample_row`. Any later request returns the stored
//! rows; it is never re-drawn.

use crate::{
    error::PipelineResult,
    event::PipelineEvent,
    rng::StageRng,
    stage::PipelineStage,
    store::PipelineStore,
    types::{RowId, RunId},
};

/// Return the stored sample for `run_id`, drawing and storing it first if
/// none exists. The flag is true when an existing sample was reused.
pub fn materialize_sample(
    store: &PipelineStore,
    run_id: &str,
    size: usize,
    rng: &mut StageRng,
) -> PipelineResult<(Vec<RowId>, bool)> {
    let existing = store.sample_row_ids(run_id)?;
    if !existing.is_empty() {
        return Ok((existing, true));
    }
    let all = store.all_row_ids()?;
    let drawn = rng.choose_distinct(&all, size);
    store.save_sample(run_id, &drawn)?;
    Ok((drawn, false))
}

pub struct SampleStage {
    run_id: RunId,
    size: usize,
    pub row_ids: Vec<RowId>,
}

impl SampleStage {
    pub fn new(run_id: RunId, size: usize) -> Self {
        Self {
            run_id,
            size,
            row_ids: Vec::new(),
        }
    }
}

impl PipelineStage for SampleStage {
    fn name(&self) -> &'static str {
        "sample"
    }

    fn run(
        &mut self,
        store: &PipelineStore,
        _events_in: &[PipelineEvent],
        rng: &mut StageRng,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let (row_ids, reused) = materialize_sample(store, &self.run_id, self.size, rng)?;
        log::info!(
            "Sample of {} rows {}",
            row_ids.len(),
            if reused { "reused" } else { "materialized" }
        );
        let rows = row_ids.len();
        self.row_ids = row_ids;
        Ok(vec![PipelineEvent::SampleMaterialized { rows, reused }])
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
