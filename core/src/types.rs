//! Shared primitive types used across the entire pipeline.

/// The `Row ID` column of the source file. Immutable for the life of a run.
pub type RowId = i64;

/// The canonical run identifier.
pub type RunId = String;

/// Position of a stage in the engine's execution order.
pub type StageSeq = u32;

/// Generate a fresh run identifier.
pub fn new_run_id() -> RunId {
    format!("run-{}", uuid::Uuid::new_v4())
}
