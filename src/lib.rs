//! A Rust library for building admission cohorts and time-windowed clinical
//! labels over an OMOP warehouse, with in-process reconstruction and local
//! Parquet materialization.

pub mod algorithm;
pub mod cohort;
pub mod config;
pub mod error;
pub mod labeler;
pub mod materialize;
pub mod sql;
pub mod utils;
pub mod warehouse;

// Re-export the most common types for easier use
// Core types
pub use config::{ConfigOverrides, Defaults, ResolvedConfig, resolve};
pub use error::{LabelerError, Result};
pub use sql::{SqlTemplate, TemplateContext};

// Arrow types
pub use arrow::record_batch::RecordBatch;

// Cohorts and labels
pub use cohort::{Cohort, CohortCheck, create_cohort_table, verify_admission_cohort};
pub use labeler::{
    LabelPlan, Labeler, LabelerInfo, LabelerRegistry, create_label_table, label_plan,
    list_labelers,
};

// In-process algorithms
pub use algorithm::{CanonicalAdmission, RawInterval, WindowedLabel, reconstruct_admissions};

// Warehouse access and materialization
pub use materialize::{StreamOptions, StreamSummary, export_records, stream_query};
pub use utils::io::{BatchWriter, ParquetBatchWriter, read_parquet};
pub use warehouse::{BigQueryClient, TableRef, Warehouse};
