//! IO utilities for file operations

pub mod parquet;

pub use parquet::{BatchWriter, ParquetBatchWriter, overwrite_dir, read_parquet};
