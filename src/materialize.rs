//! Result materialization
//!
//! Streams a query result page by page into a directory of Parquet files,
//! and exports in-process admissions and labels as Parquet.

use std::path::{Path, PathBuf};
use std::time::Instant;

use arrow::datatypes::FieldRef;
use arrow::record_batch::RecordBatch;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_arrow::schema::{SchemaLike, TracingOptions};

use crate::error::{LabelerError, Result};
use crate::utils::io::{BatchWriter, overwrite_dir};
use crate::utils::logging::{create_spinner, finish_progress_bar, log_operation_complete, log_operation_start};
use crate::warehouse::Warehouse;

/// Default number of pages combined into one file
pub const DEFAULT_COMBINE_EVERY: usize = 1000;

/// Options for [`stream_query`]
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub output_dir: PathBuf,
    /// Remove an existing output directory instead of failing
    pub overwrite: bool,
    /// Number of pages combined before a file is written
    pub combine_every: usize,
    pub page_size: u32,
    pub show_progress: bool,
}

impl StreamOptions {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            overwrite: false,
            combine_every: DEFAULT_COMBINE_EVERY,
            page_size: crate::config::DEFAULT_PAGE_SIZE,
            show_progress: false,
        }
    }

    #[must_use]
    pub const fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub const fn with_combine_every(mut self, combine_every: usize) -> Self {
        self.combine_every = combine_every;
        self
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

/// Outcome of a streamed materialization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub pages: usize,
    pub rows: usize,
    pub files: Vec<PathBuf>,
}

fn chunk_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("features_{index}.parquet"))
}

/// Stream `sql` into `features_{i}.parquet` files under the output directory
///
/// The directory is prepared when the first page arrives, so a query with no
/// pages leaves the filesystem untouched. Pending pages are flushed whenever
/// the page index `i > 0` is a multiple of `combine_every`, and any remainder
/// is flushed after the last page; each file is named after the index of the
/// last page it contains.
///
/// # Errors
/// Returns [`LabelerError::OutputExists`] if the directory exists and
/// overwriting was not requested, or any warehouse or write error.
pub fn stream_query(
    warehouse: &dyn Warehouse,
    sql: &str,
    options: &StreamOptions,
    writer: &dyn BatchWriter,
) -> Result<StreamSummary> {
    if options.combine_every == 0 {
        return Err(LabelerError::config("combine_every must be positive"));
    }

    let start = Instant::now();
    let dir = options.output_dir.as_path();
    log_operation_start("Streaming query results to", dir.display());

    let spinner = options
        .show_progress
        .then(|| create_spinner(Some("Waiting for first page")));

    let mut summary = StreamSummary::default();
    let mut pending: Vec<RecordBatch> = Vec::new();
    let mut last_index = None;

    for (i, page) in warehouse.stream_paginated(sql, options.page_size)?.enumerate() {
        let page = page?;
        if i == 0 {
            overwrite_dir(dir, options.overwrite)?;
        }
        summary.pages += 1;
        pending.push(page);
        last_index = Some(i);

        if i > 0 && i % options.combine_every == 0 {
            flush(&mut pending, &chunk_path(dir, i), writer, &mut summary)?;
        }
        if let Some(pb) = &spinner {
            pb.set_message(format!("{} pages, {} rows written", summary.pages, summary.rows));
        }
    }

    if let Some(i) = last_index {
        if !pending.is_empty() {
            flush(&mut pending, &chunk_path(dir, i), writer, &mut summary)?;
        }
    }

    if let Some(pb) = &spinner {
        finish_progress_bar(pb, Some("Streaming complete"));
    }
    log_operation_complete(
        "materialized",
        dir.display(),
        Some(summary.rows),
        Some(start.elapsed()),
    );
    Ok(summary)
}

fn flush(
    pending: &mut Vec<RecordBatch>,
    path: &Path,
    writer: &dyn BatchWriter,
    summary: &mut StreamSummary,
) -> Result<()> {
    summary.rows += writer.write_batch(pending, path)?;
    summary.files.push(path.to_path_buf());
    pending.clear();
    Ok(())
}

fn tracing_options() -> TracingOptions {
    TracingOptions::default()
        .allow_null_fields(true)
        .enums_without_data_as_strings(true)
}

/// Convert serializable records into a record batch
pub fn to_record_batch<T: Serialize + DeserializeOwned>(records: &[T]) -> Result<RecordBatch> {
    let fields = Vec::<FieldRef>::from_type::<T>(tracing_options())?;
    Ok(serde_arrow::to_record_batch(&fields, &records)?)
}

/// Convert a record batch back into typed records
pub fn from_record_batch<T: DeserializeOwned>(batch: &RecordBatch) -> Result<Vec<T>> {
    Ok(serde_arrow::from_record_batch(batch)?)
}

/// Write serializable records as a single Parquet file
pub fn export_records<T: Serialize + DeserializeOwned>(
    records: &[T],
    path: &Path,
    writer: &dyn BatchWriter,
) -> Result<usize> {
    log_operation_start("Exporting records to", path.display());
    let batch = to_record_batch(records)?;
    let rows = writer.write_batch(&[batch], path)?;
    log_operation_complete("exported", path.display(), Some(rows), None);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{CanonicalAdmission, TierLabel};
    use crate::algorithm::SeverityTier;
    use crate::utils::io::{ParquetBatchWriter, read_parquet};
    use crate::utils::test::{RecordingWarehouse, at, id_batch};

    fn pages(n: usize) -> Vec<RecordBatch> {
        (0..n).map(|i| id_batch(&[i as i64])).collect()
    }

    #[test]
    fn test_chunking_follows_page_index() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("features");
        let warehouse = RecordingWarehouse::new().with_pages(pages(5));
        let options = StreamOptions::new(&out).with_combine_every(2);

        let summary =
            stream_query(&warehouse, "SELECT 1", &options, &ParquetBatchWriter::default()).unwrap();

        assert_eq!(summary.pages, 5);
        assert_eq!(summary.rows, 5);
        assert_eq!(
            summary.files,
            vec![
                chunk_path(&out, 2),
                chunk_path(&out, 4),
            ]
        );
        let first = read_parquet(&chunk_path(&out, 2)).unwrap();
        assert_eq!(first.iter().map(RecordBatch::num_rows).sum::<usize>(), 3);
    }

    #[test]
    fn test_final_partial_flush() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("features");
        let warehouse = RecordingWarehouse::new().with_pages(pages(4));
        let options = StreamOptions::new(&out).with_combine_every(2);

        let summary =
            stream_query(&warehouse, "SELECT 1", &options, &ParquetBatchWriter::default()).unwrap();
        assert_eq!(summary.files, vec![chunk_path(&out, 2), chunk_path(&out, 3)]);
        assert_eq!(summary.rows, 4);
    }

    #[test]
    fn test_no_pages_leaves_directory_absent() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("features");
        let warehouse = RecordingWarehouse::new();
        let summary = stream_query(
            &warehouse,
            "SELECT 1",
            &StreamOptions::new(&out),
            &ParquetBatchWriter::default(),
        )
        .unwrap();
        assert_eq!(summary, StreamSummary::default());
        assert!(!out.exists());
    }

    #[test]
    fn test_existing_directory_requires_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = RecordingWarehouse::new().with_pages(pages(1));
        let err = stream_query(
            &warehouse,
            "SELECT 1",
            &StreamOptions::new(dir.path()),
            &ParquetBatchWriter::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LabelerError::OutputExists(_)));
    }

    #[test]
    fn test_export_admissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admissions.parquet");
        let admissions = vec![CanonicalAdmission {
            person_id: 1,
            admit_date: at(1, 8),
            discharge_date: at(5, 12),
        }];
        let rows = export_records(&admissions, &path, &ParquetBatchWriter::default()).unwrap();
        assert_eq!(rows, 1);

        let batches = read_parquet(&path).unwrap();
        let back: Vec<CanonicalAdmission> = from_record_batch(&batches[0]).unwrap();
        assert_eq!(back, admissions);
    }

    #[test]
    fn test_tier_labels_to_batch() {
        let labels = vec![TierLabel {
            person_id: 1,
            window_start: at(1, 0),
            window_end: at(2, 0),
            severity_tier: SeverityTier::Severe,
            first_value: 0.4,
            first_measured_at: at(1, 6),
        }];
        let batch = to_record_batch(&labels).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.schema().field(3).name(), "severity_tier");
    }
}
