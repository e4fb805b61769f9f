//! Parquet file operations
//!
//! Writing Arrow record batches to Parquet files and reading them back, plus
//! preparation of output directories.

use std::fs::{self, File};
use std::path::Path;

use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{LabelerError, Result};
use crate::utils::logging::{log_operation_complete, log_operation_start};

/// Default batch size for Parquet reading
pub const DEFAULT_BATCH_SIZE: usize = 16384;

/// Create `path` as an empty directory
///
/// # Arguments
/// * `path` - Directory to create
/// * `overwrite` - Whether an existing directory may be removed first
///
/// # Errors
/// Returns [`LabelerError::OutputExists`] if the directory exists and
/// `overwrite` is false
pub fn overwrite_dir(path: &Path, overwrite: bool) -> Result<()> {
    if path.exists() {
        if !overwrite {
            return Err(LabelerError::OutputExists(path.to_path_buf()));
        }
        fs::remove_dir_all(path)?;
    }
    fs::create_dir_all(path)?;
    Ok(())
}

/// Sink for record batches
pub trait BatchWriter {
    /// Write `batches` as a single file at `path`, returning the row count
    fn write_batch(&self, batches: &[RecordBatch], path: &Path) -> Result<usize>;
}

/// Writes batches to Parquet with a fixed compression codec
#[derive(Debug, Clone, Copy)]
pub struct ParquetBatchWriter {
    compression: Compression,
}

impl Default for ParquetBatchWriter {
    fn default() -> Self {
        Self {
            compression: Compression::SNAPPY,
        }
    }
}

impl ParquetBatchWriter {
    #[must_use]
    pub const fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

impl BatchWriter for ParquetBatchWriter {
    fn write_batch(&self, batches: &[RecordBatch], path: &Path) -> Result<usize> {
        let Some(first) = batches.first() else {
            return Ok(0);
        };

        let properties = WriterProperties::builder()
            .set_compression(self.compression)
            .build();
        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, first.schema(), Some(properties))?;

        let mut rows = 0;
        for batch in batches {
            writer.write(batch)?;
            rows += batch.num_rows();
        }
        writer.close()?;

        log::debug!("Wrote {rows} rows to {}", path.display());
        Ok(rows)
    }
}

/// Read a Parquet file into Arrow record batches
///
/// # Arguments
/// * `path` - Path to the Parquet file
///
/// # Returns
/// A vector of `RecordBatch` objects
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>> {
    log_operation_start("Reading parquet file", path.display());
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(DEFAULT_BATCH_SIZE)
        .build()?;

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    let rows = batches.iter().map(RecordBatch::num_rows).sum();
    log_operation_complete("read", path.display(), Some(rows), None);
    Ok(batches)
}
