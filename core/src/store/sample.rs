//! Store methods for the materialized reproducible sample.

use crate::{error::PipelineResult, types::RowId};
use rusqlite::params;

use super::PipelineStore;

impl PipelineStore {
    /// Row ids of the stored sample, in draw order. Empty if none drawn yet.
    pub fn sample_row_ids(&self, run_id: &str) -> PipelineResult<Vec<RowId>> {
        let mut stmt = self.conn.prepare(
            "SELECT row_id FROM sample_row WHERE run_id = ?1 ORDER BY draw_order",
        )?;
        let ids = stmt
            .query_map(params![run_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Persist a drawn sample. Called once per run.
    pub fn save_sample(&self, run_id: &str, row_ids: &[RowId]) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sample_row (run_id, draw_order, row_id) VALUES (?1, ?2, ?3)",
            )?;
            for (i, row_id) in row_ids.iter().enumerate() {
                stmt.execute(params![run_id, i as i64, row_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
