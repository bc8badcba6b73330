//! Profiler stage: per-field data-quality profile.
//!
//! Read-only. Runs after loading and before any correction, so the
//! profile describes the raw table.

use crate::{
    error::PipelineResult,
    event::PipelineEvent,
    rng::StageRng,
    schema::Field,
    stage::PipelineStage,
    store::PipelineStore,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProfile {
    pub field: Field,
    pub null_count: i64,
    pub distinct_count: i64,
    /// Numeric fields only.
    pub min: Option<f64>,
    pub mean: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub row_count: i64,
    pub fields: Vec<FieldProfile>,
}

impl DatasetProfile {
    pub fn get(&self, field: Field) -> Option<&FieldProfile> {
        self.fields.iter().find(|p| p.field == field)
    }

    /// Fields with at least one NULL.
    pub fn fields_with_nulls(&self) -> Vec<Field> {
        self.fields
            .iter()
            .filter(|p| p.null_count > 0)
            .map(|p| p.field)
            .collect()
    }
}

/// Profile every field of the batch table.
pub fn profile_dataset(store: &PipelineStore) -> PipelineResult<DatasetProfile> {
    let row_count = store.transaction_count()?;
    let fields = Field::ALL
        .iter()
        .map(|f| store.field_profile(*f))
        .collect::<PipelineResult<Vec<_>>>()?;
    Ok(DatasetProfile { row_count, fields })
}

pub struct ProfileStage {
    pub profile: Option<DatasetProfile>,
}

impl ProfileStage {
    pub fn new() -> Self {
        Self { profile: None }
    }
}

impl Default for ProfileStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for ProfileStage {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn run(
        &mut self,
        store: &PipelineStore,
        _events_in: &[PipelineEvent],
        _rng: &mut StageRng,
    ) -> PipelineResult<Vec<PipelineEvent>> {
        let profile = profile_dataset(store)?;

        for p in &profile.fields {
            log::debug!(
                "profile {}: nulls={} distinct={} min={:?} mean={:?} max={:?}",
                p.field, p.null_count, p.distinct_count, p.min, p.mean, p.max
            );
        }
        let with_nulls = profile.fields_with_nulls();
        if !with_nulls.is_empty() {
            log::info!("{} field(s) contain NULLs: {:?}", with_nulls.len(), with_nulls);
        }

        self.profile = Some(profile.clone());
        Ok(vec![PipelineEvent::ProfileCompleted { profile }])
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
