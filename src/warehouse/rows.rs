//! Conversion of warehouse JSON result pages into Arrow record batches

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Date32Builder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{LabelerError, Result};

/// Field descriptor in a query result schema
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
}

impl TableFieldSchema {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    fn data_type(&self) -> DataType {
        if self.is_repeated() {
            return DataType::Utf8;
        }
        match self.field_type.as_str() {
            "INTEGER" | "INT64" => DataType::Int64,
            "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => DataType::Float64,
            "BOOLEAN" | "BOOL" => DataType::Boolean,
            "TIMESTAMP" => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            "DATETIME" => DataType::Timestamp(TimeUnit::Microsecond, None),
            "DATE" => DataType::Date32,
            _ => DataType::Utf8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

impl TableSchema {
    /// Arrow schema with every column nullable
    #[must_use]
    pub fn to_arrow(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.fields
                .iter()
                .map(|f| Field::new(&f.name, f.data_type(), true))
                .collect::<Vec<_>>(),
        ))
    }
}

/// One result row: `{"f": [{"v": ...}, ...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct TableRow {
    pub f: Vec<TableCell>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub v: Value,
}

enum ColumnBuilder {
    Utf8(StringBuilder),
    Int64(Int64Builder),
    Float64(Float64Builder),
    Boolean(BooleanBuilder),
    Timestamp(TimestampMicrosecondBuilder),
    Datetime(TimestampMicrosecondBuilder),
    Date(Date32Builder),
}

impl ColumnBuilder {
    fn for_type(data_type: &DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Int64 => Self::Int64(Int64Builder::with_capacity(capacity)),
            DataType::Float64 => Self::Float64(Float64Builder::with_capacity(capacity)),
            DataType::Boolean => Self::Boolean(BooleanBuilder::with_capacity(capacity)),
            DataType::Timestamp(_, Some(_)) => Self::Timestamp(
                TimestampMicrosecondBuilder::with_capacity(capacity).with_timezone("UTC"),
            ),
            DataType::Timestamp(_, None) => {
                Self::Datetime(TimestampMicrosecondBuilder::with_capacity(capacity))
            }
            DataType::Date32 => Self::Date(Date32Builder::with_capacity(capacity)),
            _ => Self::Utf8(StringBuilder::with_capacity(capacity, capacity * 16)),
        }
    }

    fn append(&mut self, column: &str, value: &Value) -> Result<()> {
        let text = match value {
            Value::Null => None,
            Value::String(s) => Some(s.as_str()),
            _ => {
                // Nested and repeated values are kept as JSON text
                if let Self::Utf8(builder) = self {
                    builder.append_value(value.to_string());
                    return Ok(());
                }
                return Err(unexpected(column, value));
            }
        };

        match (self, text) {
            (Self::Utf8(b), t) => b.append_option(t),
            (Self::Int64(b), t) => b.append_option(t.map(|s| parse_num(column, s)).transpose()?),
            (Self::Float64(b), t) => {
                b.append_option(t.map(|s| parse_num(column, s)).transpose()?);
            }
            (Self::Boolean(b), t) => b.append_option(t.map(|s| s.eq_ignore_ascii_case("true"))),
            (Self::Timestamp(b), t) => {
                b.append_option(t.map(|s| parse_timestamp(column, s)).transpose()?);
            }
            (Self::Datetime(b), t) => {
                b.append_option(t.map(|s| parse_datetime(column, s)).transpose()?);
            }
            (Self::Date(b), t) => b.append_option(t.map(|s| parse_date(column, s)).transpose()?),
        }
        Ok(())
    }

    fn finish(self) -> ArrayRef {
        match self {
            Self::Utf8(mut b) => Arc::new(b.finish()),
            Self::Int64(mut b) => Arc::new(b.finish()),
            Self::Float64(mut b) => Arc::new(b.finish()),
            Self::Boolean(mut b) => Arc::new(b.finish()),
            Self::Timestamp(mut b) | Self::Datetime(mut b) => Arc::new(b.finish()),
            Self::Date(mut b) => Arc::new(b.finish()),
        }
    }
}

fn unexpected(column: &str, value: &Value) -> LabelerError {
    LabelerError::Serialization(format!("Unexpected value {value} in column {column}"))
}

fn parse_num<T: std::str::FromStr>(column: &str, s: &str) -> Result<T> {
    s.parse().map_err(|_| {
        LabelerError::Serialization(format!("Cannot parse '{s}' as a number in column {column}"))
    })
}

/// Timestamps arrive either as integer microseconds or as float seconds
fn parse_timestamp(column: &str, s: &str) -> Result<i64> {
    if let Ok(micros) = s.parse::<i64>() {
        return Ok(micros);
    }
    let seconds: f64 = parse_num(column, s)?;
    #[allow(clippy::cast_possible_truncation)]
    Ok((seconds * 1_000_000.0).round() as i64)
}

fn parse_datetime(column: &str, s: &str) -> Result<i64> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|dt| dt.and_utc().timestamp_micros())
        .map_err(|e| {
            LabelerError::Serialization(format!("Invalid DATETIME '{s}' in column {column}: {e}"))
        })
}

fn parse_date(column: &str, s: &str) -> Result<i32> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        LabelerError::Serialization(format!("Invalid DATE '{s}' in column {column}: {e}"))
    })?;
    let days = date
        .signed_duration_since(NaiveDate::default())
        .num_days();
    i32::try_from(days)
        .map_err(|_| LabelerError::Serialization(format!("DATE '{s}' out of range in {column}")))
}

/// Build a record batch from one page of JSON rows
pub fn rows_to_batch(schema: &TableSchema, rows: &[TableRow]) -> Result<RecordBatch> {
    let arrow_schema = schema.to_arrow();
    let mut builders: Vec<ColumnBuilder> = arrow_schema
        .fields()
        .iter()
        .map(|f| ColumnBuilder::for_type(f.data_type(), rows.len()))
        .collect();

    for row in rows {
        if row.f.len() != builders.len() {
            return Err(LabelerError::Serialization(format!(
                "Row has {} cells but the schema has {} fields",
                row.f.len(),
                builders.len()
            )));
        }
        for ((builder, cell), field) in builders.iter_mut().zip(&row.f).zip(&schema.fields) {
            builder.append(&field.name, &cell.v)?;
        }
    }

    let columns = builders.into_iter().map(ColumnBuilder::finish).collect();
    Ok(RecordBatch::try_new(arrow_schema, columns)?)
}
