//! Store methods for the batch transactions table.

use crate::{
    error::PipelineResult,
    loader::TransactionRecord,
    profile_stage::FieldProfile,
    schema::Field,
    types::RowId,
};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::PipelineStore;

const SELECT_ALL_COLUMNS: &str = "SELECT row_id, order_id, order_date, ship_date, ship_mode,
        customer_id, customer_name, segment, city, state, country, market, region,
        product_id, category, sub_category, product_name,
        sales, quantity, discount, profit, shipping_cost, order_priority
     FROM transactions";

impl PipelineStore {
    /// Insert every record inside one transaction.
    /// A failure on any row rolls the whole load back.
    pub fn insert_transactions(&self, records: &[TransactionRecord]) -> PipelineResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO transactions (
                    row_id, order_id, order_date, ship_date, ship_mode,
                    customer_id, customer_name, segment, city, state, country, market, region,
                    product_id, category, sub_category, product_name,
                    sales, quantity, discount, profit, shipping_cost, order_priority
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                          ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.row_id,
                    &r.order_id,
                    iso_date(r.order_date),
                    iso_date(r.ship_date),
                    &r.ship_mode,
                    &r.customer_id,
                    &r.customer_name,
                    &r.segment,
                    &r.city,
                    &r.state,
                    &r.country,
                    &r.market,
                    &r.region,
                    &r.product_id,
                    &r.category,
                    &r.sub_category,
                    &r.product_name,
                    r.sales,
                    r.quantity,
                    r.discount,
                    r.profit,
                    r.shipping_cost,
                    &r.order_priority,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn transaction_count(&self) -> PipelineResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn all_row_ids(&self) -> PipelineResult<Vec<RowId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT row_id FROM transactions ORDER BY row_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Ad-hoc inspection of one row, excluded fields included.
    pub fn get_transaction(&self, row_id: RowId) -> PipelineResult<Option<TransactionRecord>> {
        let sql = format!("{SELECT_ALL_COLUMNS} WHERE row_id = ?1");
        let record = self
            .conn
            .query_row(&sql, params![row_id], read_record)
            .optional()?;
        Ok(record)
    }

    // ── Profiling ─────────────────────────────────────────────────

    /// Null count, distinct count and (numeric only) min/mean/max,
    /// all from one statement so they see the same snapshot.
    pub fn field_profile(&self, field: Field) -> PipelineResult<FieldProfile> {
        let col = field.column();
        let sql = if field.is_numeric() {
            format!(
                "SELECT COUNT(*) - COUNT({col}), COUNT(DISTINCT {col}),
                        MIN({col}), AVG({col}), MAX({col})
                 FROM transactions"
            )
        } else {
            format!(
                "SELECT COUNT(*) - COUNT({col}), COUNT(DISTINCT {col}), NULL, NULL, NULL
                 FROM transactions"
            )
        };
        let profile = self.conn.query_row(&sql, [], |row| {
            Ok(FieldProfile {
                field,
                null_count: row.get(0)?,
                distinct_count: row.get(1)?,
                min: row.get(2)?,
                mean: row.get(3)?,
                max: row.get(4)?,
            })
        })?;
        Ok(profile)
    }

    // ── Consistency ───────────────────────────────────────────────

    /// (count_distinct(child), count_distinct(concat(parent, child))).
    /// Rows with a NULL child are ignored; a NULL parent counts as ''.
    pub fn hierarchy_counts(&self, parent: Field, child: Field) -> PipelineResult<(i64, i64)> {
        let (p, c) = (parent.column(), child.column());
        let sql = format!(
            "SELECT COUNT(DISTINCT {c}),
                    COUNT(DISTINCT COALESCE({p}, '') || '|' || {c})
             FROM transactions WHERE {c} IS NOT NULL"
        );
        let counts = self
            .conn
            .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(counts)
    }

    /// (child value, parent value, row id) for every row whose child value
    /// maps to more than one parent value.
    pub fn hierarchy_offenders(
        &self,
        parent: Field,
        child: Field,
    ) -> PipelineResult<Vec<(String, String, RowId)>> {
        let (p, c) = (parent.column(), child.column());
        let sql = format!(
            "SELECT {c}, COALESCE({p}, ''), row_id FROM transactions
             WHERE {c} IN (
                 SELECT {c} FROM transactions WHERE {c} IS NOT NULL
                 GROUP BY {c} HAVING COUNT(DISTINCT COALESCE({p}, '')) > 1
             )
             ORDER BY {c}, 2, row_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Groups of rows identical in every column except `row_id`.
    pub fn duplicate_groups(&self) -> PipelineResult<Vec<Vec<RowId>>> {
        let columns = Field::ALL
            .iter()
            .filter(|f| **f != Field::RowId)
            .map(|f| f.column())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT GROUP_CONCAT(row_id) FROM transactions
             GROUP BY {columns} HAVING COUNT(*) > 1
             ORDER BY MIN(row_id)"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let groups = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|ids| {
                let mut ids: Vec<RowId> =
                    ids.split(',').filter_map(|id| id.trim().parse().ok()).collect();
                ids.sort_unstable();
                ids
            })
            .collect();
        Ok(groups)
    }

    // ── Ad-hoc inspection ─────────────────────────────────────────

    /// Distinct values of `target` among rows where `key = key_value`.
    pub fn distinct_values_where(
        &self,
        target: Field,
        key: Field,
        key_value: &str,
    ) -> PipelineResult<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT CAST({t} AS TEXT) FROM transactions
             WHERE {k} = ?1 AND {t} IS NOT NULL ORDER BY 1",
            t = target.column(),
            k = key.column(),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let values = stmt
            .query_map(params![key_value], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }

    /// Number of rows where `field = value`.
    pub fn count_where(&self, field: Field, value: &str) -> PipelineResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM transactions WHERE {} = ?1",
            field.column()
        );
        let count: i64 = self.conn.query_row(&sql, params![value], |row| row.get(0))?;
        Ok(count)
    }
}

fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_iso_date(idx: usize, text: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        row_id: row.get(0)?,
        order_id: row.get(1)?,
        order_date: parse_iso_date(2, row.get(2)?)?,
        ship_date: parse_iso_date(3, row.get(3)?)?,
        ship_mode: row.get(4)?,
        customer_id: row.get(5)?,
        customer_name: row.get(6)?,
        segment: row.get(7)?,
        city: row.get(8)?,
        state: row.get(9)?,
        country: row.get(10)?,
        market: row.get(11)?,
        region: row.get(12)?,
        product_id: row.get(13)?,
        category: row.get(14)?,
        sub_category: row.get(15)?,
        product_name: row.get(16)?,
        sales: row.get(17)?,
        quantity: row.get(18)?,
        discount: row.get(19)?,
        profit: row.get(20)?,
        shipping_cost: row.get(21)?,
        order_priority: row.get(22)?,
    })
}
