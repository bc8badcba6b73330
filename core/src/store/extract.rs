//! Store methods producing the reporting extract with surrogate keys.
//!
//! Key rules (must match downstream extracts exactly):
//!   product  = UPPER(category[..3]) '-' UPPER(sub_category[..2]) '-' (row# in sub_category + 100000)
//!   country  = UPPER(market) '-' (row# in market + 1000)
//!   segment  = row# ordered by segment name
//!   date     = YYYYMMDD

use crate::{
    error::PipelineResult,
    extract::{DimCountry, DimDate, DimProduct, DimSegment, FactSales},
};

use super::PipelineStore;

const PRODUCT_DIM: &str = "product_dim AS (
    SELECT UPPER(SUBSTR(category, 1, 3)) || '-' || UPPER(SUBSTR(sub_category, 1, 2)) || '-' ||
           (ROW_NUMBER() OVER (PARTITION BY sub_category ORDER BY product_name) + 100000)
               AS product_key,
           category, sub_category, product_name
    FROM (SELECT DISTINCT category, sub_category, product_name
          FROM transactions WHERE product_name IS NOT NULL)
)";

const COUNTRY_DIM: &str = "country_dim AS (
    SELECT UPPER(market) || '-' || (ROW_NUMBER() OVER (PARTITION BY market ORDER BY country) + 1000)
               AS country_key,
           market, country
    FROM (SELECT DISTINCT market, country FROM transactions WHERE country IS NOT NULL)
)";

const SEGMENT_DIM: &str = "segment_dim AS (
    SELECT ROW_NUMBER() OVER (ORDER BY segment) AS segment_key, segment
    FROM (SELECT DISTINCT segment FROM transactions WHERE segment IS NOT NULL)
)";

/// Which measure columns the fact extract may expose.
#[derive(Debug, Clone, Copy)]
pub struct FactMeasures {
    pub sales: bool,
    pub quantity: bool,
    pub discount: bool,
    pub profit: bool,
}

impl PipelineStore {
    pub fn product_dimension(&self) -> PipelineResult<Vec<DimProduct>> {
        let sql = format!(
            "WITH {PRODUCT_DIM}
             SELECT product_key, category, sub_category, product_name
             FROM product_dim ORDER BY sub_category, product_key"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DimProduct {
                    product_key: row.get(0)?,
                    category: row.get(1)?,
                    sub_category: row.get(2)?,
                    product_name: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn country_dimension(&self) -> PipelineResult<Vec<DimCountry>> {
        let sql = format!(
            "WITH {COUNTRY_DIM}
             SELECT country_key, market, country
             FROM country_dim ORDER BY market, country"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DimCountry {
                    country_key: row.get(0)?,
                    market: row.get(1)?,
                    country: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn segment_dimension(&self) -> PipelineResult<Vec<DimSegment>> {
        let sql = format!(
            "WITH {SEGMENT_DIM}
             SELECT segment_key, segment FROM segment_dim ORDER BY segment_key"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DimSegment {
                    segment_key: row.get(0)?,
                    segment: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn date_dimension(&self) -> PipelineResult<Vec<DimDate>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT
                CAST(strftime('%Y%m%d', order_date) AS INTEGER),
                order_date,
                CAST(strftime('%Y', order_date) AS INTEGER),
                (CAST(strftime('%m', order_date) AS INTEGER) + 2) / 3,
                CAST(strftime('%m', order_date) AS INTEGER),
                CAST(strftime('%d', order_date) AS INTEGER)
             FROM transactions ORDER BY 1",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(DimDate {
                    date_key: row.get(0)?,
                    date: row.get(1)?,
                    year: row.get(2)?,
                    quarter: row.get(3)?,
                    month: row.get(4)?,
                    day: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// One fact row per transaction. Measures not allowed by `measures`
    /// are emitted as NULL.
    pub fn fact_sales(&self, measures: FactMeasures) -> PipelineResult<Vec<FactSales>> {
        let pick = |allowed: bool, expr: &'static str| if allowed { expr } else { "NULL" };
        let sql = format!(
            "WITH {PRODUCT_DIM}, {COUNTRY_DIM}, {SEGMENT_DIM}
             SELECT t.row_id,
                    CAST(strftime('%Y%m%d', t.order_date) AS INTEGER),
                    s.segment_key, c.country_key, p.product_key,
                    {sales}, {quantity}, {discount}, {flag}, {profit}
             FROM transactions t
             LEFT JOIN segment_dim s ON s.segment = t.segment
             LEFT JOIN country_dim c ON c.market IS t.market AND c.country = t.country
             LEFT JOIN product_dim p ON p.category IS t.category
                                    AND p.sub_category IS t.sub_category
                                    AND p.product_name = t.product_name
             ORDER BY t.row_id",
            sales = pick(measures.sales, "t.sales"),
            quantity = pick(measures.quantity, "t.quantity"),
            discount = pick(measures.discount, "t.discount"),
            flag = pick(
                measures.discount,
                "CASE WHEN t.discount > 0 THEN 1 ELSE 0 END"
            ),
            profit = pick(measures.profit, "t.profit"),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FactSales {
                    row_id: row.get(0)?,
                    date_key: row.get(1)?,
                    segment_key: row.get(2)?,
                    country_key: row.get(3)?,
                    product_key: row.get(4)?,
                    sales: row.get(5)?,
                    quantity: row.get(6)?,
                    discount: row.get(7)?,
                    discount_flag: row.get(8)?,
                    profit: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
