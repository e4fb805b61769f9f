//! Warehouse access
//!
//! The [`Warehouse`] trait is the only seam between SQL generation and the
//! managed warehouse. Every call blocks until the warehouse reports
//! completion; failures are surfaced unmodified and never retried.

pub mod auth;
pub mod bigquery;
pub mod rows;

use std::fmt;
use std::str::FromStr;

use arrow::record_batch::RecordBatch;

use crate::error::{LabelerError, Result};

pub use bigquery::BigQueryClient;

/// Sequential pages of a query result
pub type PageStream<'a> = Box<dyn Iterator<Item = Result<RecordBatch>> + 'a>;

/// A `project.dataset.table` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl FromStr for TableRef {
    type Err = LabelerError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim_matches('`').split('.').collect();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(Self::new(*project, *dataset, *table))
            }
            _ => Err(LabelerError::config(format!(
                "Expected a table reference of the form project.dataset.table, got '{s}'"
            ))),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Blocking warehouse client
pub trait Warehouse {
    /// Run a statement or script and wait for completion
    fn execute(&self, sql: &str) -> Result<()>;

    /// Run a query and overwrite `destination` with its result
    ///
    /// # Errors
    /// Returns [`LabelerError::MissingDestination`] when `destination` is `None`
    fn execute_to_destination(&self, sql: &str, destination: Option<&TableRef>) -> Result<()>;

    /// Run a query and return its result page by page
    fn stream_paginated<'a>(&'a self, sql: &str, page_size: u32) -> Result<PageStream<'a>>;

    /// Run a query and collect every page into memory
    fn read_query(&self, sql: &str, page_size: u32) -> Result<Vec<RecordBatch>> {
        self.stream_paginated(sql, page_size)?.collect()
    }
}
