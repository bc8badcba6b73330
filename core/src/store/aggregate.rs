//! Store methods feeding the aggregator: SQL-side reductions, or grouping
//! keys + raw measure cells for reductions SQLite lacks.

use crate::{error::PipelineResult, schema::Field};
use rusqlite::{params_from_iter, types::ValueRef};
use serde::{Deserialize, Serialize};

use super::PipelineStore;

/// One measure value as read from the batch table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Identity used for distinct counting. NULL has none.
    pub fn distinct_key(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Number(v) => Some(v.to_string()),
            Cell::Text(t) => Some(t.clone()),
        }
    }
}

fn key_select(key_exprs: &[String]) -> Vec<String> {
    key_exprs
        .iter()
        .map(|e| format!("COALESCE(CAST({e} AS TEXT), '')"))
        .collect()
}

/// `WHERE` clause leaving out rows equal to each exclusion value; the
/// values bind as ?1..?n in order.
fn exclude_clause(exclude: &[(Field, String)]) -> String {
    if exclude.is_empty() {
        return String::new();
    }
    let conds = exclude
        .iter()
        .enumerate()
        .map(|(i, (f, _))| format!("{} IS NOT ?{}", f.column(), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(" WHERE {conds}")
}

fn read_keys(row: &rusqlite::Row<'_>, n_keys: usize) -> rusqlite::Result<Vec<String>> {
    (0..n_keys).map(|i| row.get::<_, String>(i)).collect()
}

impl PipelineStore {
    /// One (keys, measure) pair per row. Keys are rendered as text, NULL
    /// keys as ''. Rows where any `exclude` field equals its value are
    /// skipped.
    pub fn grouped_cells(
        &self,
        key_exprs: &[String],
        measure: Field,
        exclude: &[(Field, String)],
    ) -> PipelineResult<Vec<(Vec<String>, Cell)>> {
        let mut select = key_select(key_exprs);
        select.push(measure.column().to_string());
        let sql = format!(
            "SELECT {} FROM transactions{}",
            select.join(", "),
            exclude_clause(exclude)
        );
        let n_keys = key_exprs.len();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(exclude.iter().map(|(_, v)| v)), |row| {
                let keys = read_keys(row, n_keys)?;
                let cell = match row.get_ref(n_keys)? {
                    ValueRef::Null => Cell::Null,
                    ValueRef::Integer(i) => Cell::Number(i as f64),
                    ValueRef::Real(r) => Cell::Number(r),
                    ValueRef::Text(t) | ValueRef::Blob(t) => {
                        Cell::Text(String::from_utf8_lossy(t).into_owned())
                    }
                };
                Ok((keys, cell))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Let SQLite group and reduce: one (keys, value) pair per distinct
    /// key combination. `reduction` is an aggregate expression such as
    /// `SUM(sales)`. Without keys there is exactly one row.
    pub fn grouped_reduction(
        &self,
        key_exprs: &[String],
        reduction: &str,
        exclude: &[(Field, String)],
    ) -> PipelineResult<Vec<(Vec<String>, Option<f64>)>> {
        let keys = key_select(key_exprs);
        let mut select = keys.clone();
        select.push(reduction.to_string());
        let group_by = if keys.is_empty() {
            String::new()
        } else {
            format!(" GROUP BY {}", keys.join(", "))
        };
        let sql = format!(
            "SELECT {} FROM transactions{}{group_by}",
            select.join(", "),
            exclude_clause(exclude)
        );
        let n_keys = key_exprs.len();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(exclude.iter().map(|(_, v)| v)), |row| {
                Ok((read_keys(row, n_keys)?, row.get::<_, Option<f64>>(n_keys)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
