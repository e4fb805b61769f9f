//! Typed access to cohort and visit columns of warehouse result batches

use arrow::array::{Array, Int64Array, TimestampMicrosecondArray};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime};

use crate::algorithm::{CanonicalAdmission, RawInterval};
use crate::error::{LabelerError, Result};

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| LabelerError::Serialization(format!("Missing column {name}")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| LabelerError::Serialization(format!("Unexpected type for column {name}")))
}

fn ids(batch: &RecordBatch, name: &str) -> Result<Vec<i64>> {
    let array = column::<Int64Array>(batch, name)?;
    (0..array.len())
        .map(|i| {
            if array.is_null(i) {
                Err(LabelerError::Serialization(format!("Null {name} at row {i}")))
            } else {
                Ok(array.value(i))
            }
        })
        .collect()
}

fn datetimes(batch: &RecordBatch, name: &str) -> Result<Vec<NaiveDateTime>> {
    let array = column::<TimestampMicrosecondArray>(batch, name)?;
    (0..array.len())
        .map(|i| {
            if array.is_null(i) {
                return Err(LabelerError::Serialization(format!("Null {name} at row {i}")));
            }
            DateTime::from_timestamp_micros(array.value(i))
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| {
                    LabelerError::Serialization(format!("Out of range {name} at row {i}"))
                })
        })
        .collect()
}

/// Decode visit rows of the admission base query
pub fn visits_from_batches(batches: &[RecordBatch]) -> Result<Vec<RawInterval>> {
    let mut visits = Vec::new();
    for batch in batches {
        let people = ids(batch, "person_id")?;
        let starts = datetimes(batch, "visit_start_datetime")?;
        let ends = datetimes(batch, "visit_end_datetime")?;
        visits.extend(
            people
                .into_iter()
                .zip(starts.into_iter().zip(ends))
                .map(|(person_id, (start, end))| RawInterval::new(person_id, start, end)),
        );
    }
    Ok(visits)
}

/// Decode cohort rows using the configured window columns
pub fn admissions_from_batches(
    batches: &[RecordBatch],
    window_start: &str,
    window_end: &str,
) -> Result<Vec<CanonicalAdmission>> {
    let mut admissions = Vec::new();
    for batch in batches {
        let people = ids(batch, "person_id")?;
        let admits = datetimes(batch, window_start)?;
        let discharges = datetimes(batch, window_end)?;
        admissions.extend(people.into_iter().zip(admits.into_iter().zip(discharges)).map(
            |(person_id, (admit_date, discharge_date))| CanonicalAdmission {
                person_id,
                admit_date,
                discharge_date,
            },
        ));
    }
    Ok(admissions)
}
