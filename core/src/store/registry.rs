//! Store methods for the field exclusion registry.

use crate::{
    error::PipelineResult,
    exclusion_stage::{FieldRegistry, FieldStatus},
    schema::Field,
};
use rusqlite::params;

use super::PipelineStore;

impl PipelineStore {
    /// Replace the stored registry for this run.
    pub fn save_field_registry(&self, run_id: &str, registry: &FieldRegistry) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM field_registry WHERE run_id = ?1", params![run_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO field_registry (run_id, field, status, reason)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in registry.entries() {
                stmt.execute(params![
                    run_id,
                    entry.field.column(),
                    entry.status.as_str(),
                    &entry.reason,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Excluded fields recorded for this run, with their status.
    pub fn excluded_fields(&self, run_id: &str) -> PipelineResult<Vec<(Field, FieldStatus)>> {
        let mut stmt = self.conn.prepare(
            "SELECT field, status FROM field_registry
             WHERE run_id = ?1 AND status != 'included'
             ORDER BY field",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(field, status)| {
                Some((Field::from_column(&field)?, FieldStatus::parse(&status)?))
            })
            .collect())
    }
}
