//! Store methods for the correction batch and its audit trail.

use crate::{
    corrector_stage::CorrectionRecord,
    error::{PipelineError, PipelineResult},
    schema::Field,
    types::RowId,
};
use rusqlite::{params, params_from_iter};
use serde::{Deserialize, Serialize};

use super::PipelineStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionAuditRow {
    pub rule: String,
    pub row_id: RowId,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
}

impl PipelineStore {
    /// Rows matching every `when` equality where at least one `set` field
    /// differs from its target value. Returns the row id and the current
    /// value of each `set` field, in `set` order.
    pub fn correction_candidates(
        &self,
        when: &[(Field, &str)],
        set: &[(Field, &str)],
    ) -> PipelineResult<Vec<(RowId, Vec<Option<String>>)>> {
        let select_cols = set
            .iter()
            .map(|(f, _)| f.column())
            .collect::<Vec<_>>()
            .join(", ");
        let mut n = 0;
        let mut conditions: Vec<String> = when
            .iter()
            .map(|(f, _)| {
                n += 1;
                format!("{} = ?{n}", f.column())
            })
            .collect();
        let differs = set
            .iter()
            .map(|(f, _)| {
                n += 1;
                format!("{} IS NOT ?{n}", f.column())
            })
            .collect::<Vec<_>>()
            .join(" OR ");
        conditions.push(format!("({differs})"));

        let sql = format!(
            "SELECT row_id, {select_cols} FROM transactions WHERE {} ORDER BY row_id",
            conditions.join(" AND ")
        );
        let values: Vec<&str> = when.iter().chain(set.iter()).map(|(_, v)| *v).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let row_id: RowId = row.get(0)?;
                let current = (0..set.len())
                    .map(|i| row.get::<_, Option<String>>(i + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((row_id, current))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Apply a planned correction batch atomically: every update and its
    /// audit row commit together, or nothing does.
    pub fn apply_corrections(
        &self,
        run_id: &str,
        records: &[CorrectionRecord],
    ) -> PipelineResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        for r in records {
            let sql = format!(
                "UPDATE transactions SET {} = ?1 WHERE row_id = ?2",
                r.field.column()
            );
            let changed = tx.execute(&sql, params![&r.new_value, r.row_id])?;
            if changed != 1 {
                // Dropping `tx` rolls back everything applied so far.
                return Err(PipelineError::Other(anyhow::anyhow!(
                    "correction '{}' targets missing row {}",
                    r.rule,
                    r.row_id
                )));
            }
            tx.execute(
                "INSERT INTO correction_audit (run_id, rule, row_id, field, old_value, new_value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id,
                    &r.rule,
                    r.row_id,
                    r.field.column(),
                    &r.old_value,
                    &r.new_value,
                ],
            )?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn correction_audit(&self, run_id: &str) -> PipelineResult<Vec<CorrectionAuditRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT rule, row_id, field, old_value, new_value FROM correction_audit
             WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(CorrectionAuditRow {
                    rule: row.get(0)?,
                    row_id: row.get(1)?,
                    field: row.get(2)?,
                    old_value: row.get(3)?,
                    new_value: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
