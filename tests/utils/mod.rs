use std::sync::Arc;

use arrow::array::{Int64Array, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDateTime;
use cohort_labeler::algorithm::{Measurement, RawInterval, Window};
use cohort_labeler::utils::test::at;
use cohort_labeler::{ConfigOverrides, ResolvedConfig};

/// Default test configuration
#[must_use]
pub fn test_config() -> ResolvedConfig {
    ResolvedConfig::from_overrides(ConfigOverrides::default()).unwrap()
}

/// Raw visit from `(day, hour)` to `(day, hour)` in March 2021
#[must_use]
pub fn visit(person_id: i64, start: (u32, u32), end: (u32, u32)) -> RawInterval {
    RawInterval::new(person_id, at(start.0, start.1), at(end.0, end.1))
}

/// Window from `(day, hour)` to `(day, hour)` in March 2021
#[must_use]
pub fn window(person_id: i64, start: (u32, u32), end: (u32, u32)) -> Window {
    Window {
        person_id,
        start: at(start.0, start.1),
        end: at(end.0, end.1),
    }
}

/// Measurement without reference range
#[must_use]
pub fn measurement(person_id: i64, when: (u32, u32), value: f64, unit: i64) -> Measurement {
    Measurement {
        person_id,
        measured_at: at(when.0, when.1),
        value,
        unit_concept_id: unit,
        range_low: None,
        range_high: None,
    }
}

fn micros(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

/// Batch of `person_id` plus two timestamp columns, as returned by the warehouse
#[must_use]
pub fn interval_batch(start_column: &str, end_column: &str, rows: &[RawInterval]) -> RecordBatch {
    let timestamp = DataType::Timestamp(TimeUnit::Microsecond, None);
    let schema = Arc::new(Schema::new(vec![
        Field::new("person_id", DataType::Int64, true),
        Field::new(start_column, timestamp.clone(), true),
        Field::new(end_column, timestamp, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.person_id))),
            Arc::new(TimestampMicrosecondArray::from_iter_values(
                rows.iter().map(|r| micros(r.start)),
            )),
            Arc::new(TimestampMicrosecondArray::from_iter_values(
                rows.iter().map(|r| micros(r.end)),
            )),
        ],
    )
    .unwrap()
}
