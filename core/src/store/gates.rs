//! Store methods for decision gate results.

use crate::{error::PipelineResult, gate_stage::GateResult};
use rusqlite::params;

use super::PipelineStore;

/// A persisted gate_result row.
#[derive(Debug, Clone)]
pub struct GateResultRow {
    pub gate: String,
    pub dimension: String,
    pub value: String,
    pub outcome: String,
    pub evidence_json: String,
}

impl PipelineStore {
    pub fn insert_gate_result(&self, run_id: &str, result: &GateResult) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO gate_result (run_id, gate, dimension, value, outcome, evidence_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                result.gate.as_str(),
                result.dimension.column(),
                &result.value,
                result.outcome.as_str(),
                serde_json::to_string(&result.evidence)?,
            ],
        )?;
        Ok(())
    }

    pub fn gate_results(&self, run_id: &str) -> PipelineResult<Vec<GateResultRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT gate, dimension, value, outcome, evidence_json FROM gate_result
             WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(GateResultRow {
                    gate: row.get(0)?,
                    dimension: row.get(1)?,
                    value: row.get(2)?,
                    outcome: row.get(3)?,
                    evidence_json: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn gate_result_count(&self, run_id: &str, gate: &str) -> PipelineResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM gate_result WHERE run_id = ?1 AND gate = ?2",
            params![run_id, gate],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
