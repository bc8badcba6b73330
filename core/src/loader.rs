//! Loader: reads the flat transactions file into typed records.
//!
//! The header row is checked positionally against `Field::ALL` and then
//! skipped. Any cell whose text does not parse as its declared type aborts
//! the load with `SchemaMismatch`; nothing is written to the store until the
//! whole file has parsed.

use crate::{
    error::{PipelineError, PipelineResult},
    schema::{Field, FieldKind},
    types::RowId,
};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Read, path::Path};

/// Accepted date layouts, tried in order.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y"];

/// One order line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub row_id: RowId,
    pub order_id: String,
    pub order_date: NaiveDate,
    pub ship_date: NaiveDate,
    pub ship_mode: Option<String>,
    pub customer_id: String,
    pub customer_name: Option<String>,
    pub segment: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub market: Option<String>,
    pub region: Option<String>,
    pub product_id: String,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub product_name: Option<String>,
    pub sales: Option<f64>,
    pub quantity: Option<i64>,
    pub discount: Option<f64>,
    pub profit: Option<f64>,
    pub shipping_cost: Option<f64>,
    pub order_priority: Option<String>,
}

/// Open `path` and parse every row.
pub fn load_file<P: AsRef<Path>>(path: P) -> PipelineResult<Vec<TransactionRecord>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let records = read_transactions(file)?;
    log::info!("Loaded {} rows from {}", records.len(), path.display());
    Ok(records)
}

/// Parse a header + rows CSV stream.
pub fn read_transactions<R: Read>(reader: R) -> PipelineResult<Vec<TransactionRecord>> {
    // flexible: ragged rows are reported as SchemaMismatch, not csv errors.
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    check_header(rdr.headers()?)?;

    let mut records = Vec::new();
    for result in rdr.records() {
        let row = result?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        records.push(parse_row(&row, line)?);
    }
    Ok(records)
}

fn check_header(header: &StringRecord) -> PipelineResult<()> {
    if header.len() != Field::ALL.len() {
        return Err(PipelineError::SchemaMismatch {
            line: 1,
            detail: format!(
                "expected {} columns, header has {}",
                Field::ALL.len(),
                header.len()
            ),
        });
    }
    for (field, name) in Field::ALL.iter().zip(header.iter()) {
        if !field.matches_header(name) {
            return Err(PipelineError::SchemaMismatch {
                line: 1,
                detail: format!("expected column '{}', found '{name}'", field.header()),
            });
        }
    }
    Ok(())
}

fn parse_row(row: &StringRecord, line: u64) -> PipelineResult<TransactionRecord> {
    if row.len() != Field::ALL.len() {
        return Err(PipelineError::SchemaMismatch {
            line,
            detail: format!("expected {} columns, row has {}", Field::ALL.len(), row.len()),
        });
    }
    let cells = RowCells { row, line };

    let record = TransactionRecord {
        row_id:         cells.integer(Field::RowId)?,
        order_id:       cells.required_text(Field::OrderId)?,
        order_date:     cells.date(Field::OrderDate)?,
        ship_date:      cells.date(Field::ShipDate)?,
        ship_mode:      cells.text(Field::ShipMode),
        customer_id:    cells.required_text(Field::CustomerId)?,
        customer_name:  cells.text(Field::CustomerName),
        segment:        cells.text(Field::Segment),
        city:           cells.text(Field::City),
        state:          cells.text(Field::State),
        country:        cells.text(Field::Country),
        market:         cells.text(Field::Market),
        region:         cells.text(Field::Region),
        product_id:     cells.required_text(Field::ProductId)?,
        category:       cells.text(Field::Category),
        sub_category:   cells.text(Field::SubCategory),
        product_name:   cells.text(Field::ProductName),
        sales:          cells.decimal(Field::Sales)?,
        quantity:       cells.small_int(Field::Quantity)?,
        discount:       cells.decimal(Field::Discount)?,
        profit:         cells.decimal(Field::Profit)?,
        shipping_cost:  cells.decimal(Field::ShippingCost)?,
        order_priority: cells.text(Field::OrderPriority),
    };

    if record.ship_date < record.order_date {
        return Err(PipelineError::SchemaMismatch {
            line,
            detail: format!(
                "row {}: ship date {} precedes order date {}",
                record.row_id, record.ship_date, record.order_date
            ),
        });
    }
    Ok(record)
}

/// Positional cell access with typed parsing.
struct RowCells<'a> {
    row: &'a StringRecord,
    line: u64,
}

impl RowCells<'_> {
    fn raw(&self, field: Field) -> &str {
        let idx = Field::ALL.iter().position(|f| *f == field).unwrap_or(0);
        self.row.get(idx).unwrap_or("")
    }

    fn mismatch(&self, field: Field, value: &str) -> PipelineError {
        let expected = match field.kind() {
            FieldKind::Integer  => "integer",
            FieldKind::Text     => "text",
            FieldKind::Date     => "date",
            FieldKind::Decimal  => "decimal",
            FieldKind::SmallInt => "small integer",
        };
        PipelineError::SchemaMismatch {
            line: self.line,
            detail: format!("column '{}': '{value}' is not a valid {expected}", field.header()),
        }
    }

    fn text(&self, field: Field) -> Option<String> {
        let value = self.raw(field);
        (!value.is_empty()).then(|| value.to_string())
    }

    fn required_text(&self, field: Field) -> PipelineResult<String> {
        self.text(field).ok_or_else(|| self.mismatch(field, ""))
    }

    fn integer(&self, field: Field) -> PipelineResult<i64> {
        let value = self.raw(field);
        value.parse().map_err(|_| self.mismatch(field, value))
    }

    fn small_int(&self, field: Field) -> PipelineResult<Option<i64>> {
        let value = self.raw(field);
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse::<i16>()
            .map(|v| Some(i64::from(v)))
            .map_err(|_| self.mismatch(field, value))
    }

    fn decimal(&self, field: Field) -> PipelineResult<Option<f64>> {
        let value = self.raw(field);
        if value.is_empty() {
            return Ok(None);
        }
        match value.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(self.mismatch(field, value)),
        }
    }

    fn date(&self, field: Field) -> PipelineResult<NaiveDate> {
        let value = self.raw(field);
        DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
            .ok_or_else(|| self.mismatch(field, value))
    }
}
