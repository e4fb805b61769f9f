//! Configuration for cohort and label generation.
//!
//! Configuration is resolved in three steps: start from [`Defaults`], apply
//! caller-supplied [`ConfigOverrides`] (typically read from YAML), then derive
//! the special fields (limit clause, minimum-stay clause, project fallbacks).
//! The result is an immutable [`ResolvedConfig`] that is passed explicitly to
//! every cohort, labeler and warehouse operation.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{LabelerError, Result};
use crate::sql::TemplateContext;

/// Billing project used when none is configured
pub const DEFAULT_BILLING_PROJECT: &str = "som-nero-nigam-starr";
/// OMOP CDM dataset used when none is configured
pub const DEFAULT_SOURCE_DATASET: &str = "starr_omop_cdm5_deid_20210723";
/// Default number of rows fetched per result page
pub const DEFAULT_PAGE_SIZE: u32 = 1024;

/// Default location of application default credentials
#[must_use]
pub fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".config/gcloud/application_default_credentials.json")
}

/// Default values for every configuration key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub credentials_path: PathBuf,
    pub billing_project: String,
    pub source_dataset: String,
    pub results_dataset: String,
    pub temp_dataset: String,
    pub cohort_name: String,
    pub filtered_cohort_name: String,
    pub target_table: String,
    pub window_start_field: String,
    pub window_end_field: String,
    pub flowsheet_table: String,
    pub page_size: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            billing_project: DEFAULT_BILLING_PROJECT.to_string(),
            source_dataset: DEFAULT_SOURCE_DATASET.to_string(),
            results_dataset: "temp_dataset".to_string(),
            temp_dataset: "temp".to_string(),
            cohort_name: "temp_cohort".to_string(),
            filtered_cohort_name: "temp_cohort_filtered".to_string(),
            target_table: "temp_cohort_labeled".to_string(),
            window_start_field: "admit_date".to_string(),
            window_end_field: "discharge_date".to_string(),
            flowsheet_table: "flowsheets".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Caller-supplied overrides. Every field is optional; absent fields keep
/// their default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub credentials_path: Option<PathBuf>,
    pub billing_project: Option<String>,
    /// Project holding the OMOP source tables; falls back to the billing project
    pub source_project: Option<String>,
    pub source_dataset: Option<String>,
    /// Project receiving cohort and label tables; falls back to the billing project
    pub results_project: Option<String>,
    pub results_dataset: Option<String>,
    pub temp_dataset: Option<String>,
    pub cohort_name: Option<String>,
    pub filtered_cohort_name: Option<String>,
    pub target_table: Option<String>,
    pub window_start_field: Option<String>,
    pub window_end_field: Option<String>,
    /// Maximum number of visits in the cohort base query; 0 means unlimited
    pub limit: Option<u64>,
    /// Keep only visits longer than this many hours
    pub min_stay_hours: Option<u32>,
    /// Run the flowsheet extraction before labeling
    pub extract_flowsheets: Option<bool>,
    pub flowsheet_table: Option<String>,
    pub page_size: Option<u32>,
}

impl ConfigOverrides {
    /// Read overrides from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            LabelerError::config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse overrides from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Layer `other` on top of `self`; fields set in `other` win
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            credentials_path: other.credentials_path.or(self.credentials_path),
            billing_project: other.billing_project.or(self.billing_project),
            source_project: other.source_project.or(self.source_project),
            source_dataset: other.source_dataset.or(self.source_dataset),
            results_project: other.results_project.or(self.results_project),
            results_dataset: other.results_dataset.or(self.results_dataset),
            temp_dataset: other.temp_dataset.or(self.temp_dataset),
            cohort_name: other.cohort_name.or(self.cohort_name),
            filtered_cohort_name: other.filtered_cohort_name.or(self.filtered_cohort_name),
            target_table: other.target_table.or(self.target_table),
            window_start_field: other.window_start_field.or(self.window_start_field),
            window_end_field: other.window_end_field.or(self.window_end_field),
            limit: other.limit.or(self.limit),
            min_stay_hours: other.min_stay_hours.or(self.min_stay_hours),
            extract_flowsheets: other.extract_flowsheets.or(self.extract_flowsheets),
            flowsheet_table: other.flowsheet_table.or(self.flowsheet_table),
            page_size: other.page_size.or(self.page_size),
        }
    }

    /// Set the cohort row limit
    #[must_use]
    pub const fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the minimum stay filter in hours
    #[must_use]
    pub const fn with_min_stay_hours(mut self, hours: u32) -> Self {
        self.min_stay_hours = Some(hours);
        self
    }

    /// Set the cohort table name
    #[must_use]
    pub fn with_cohort_name(mut self, name: impl Into<String>) -> Self {
        self.cohort_name = Some(name.into());
        self
    }

    /// Set the billing project
    #[must_use]
    pub fn with_billing_project(mut self, project: impl Into<String>) -> Self {
        self.billing_project = Some(project.into());
        self
    }

    /// Set the credentials file
    #[must_use]
    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }
}

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub credentials_path: PathBuf,
    pub billing_project: String,
    pub source_project: String,
    pub source_dataset: String,
    pub results_project: String,
    pub results_dataset: String,
    pub temp_dataset: String,
    pub cohort_name: String,
    pub filtered_cohort_name: String,
    pub target_table: String,
    pub window_start_field: String,
    pub window_end_field: String,
    pub limit: Option<u64>,
    pub min_stay_hours: Option<u32>,
    pub extract_flowsheets: bool,
    pub flowsheet_table: String,
    pub page_size: u32,
    /// `LIMIT n`, or empty
    pub limit_clause: String,
    /// Minimum-stay `WHERE` clause over the visit base query, or empty
    pub min_stay_clause: String,
}

/// Treat `None` and empty strings alike
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Reject identifiers that could break out of the generated SQL
fn validate_identifier(key: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(LabelerError::config(format!(
            "Invalid identifier for {key}: '{value}'"
        )))
    }
}

/// Resolve overrides against defaults and derive the special fields
pub fn resolve(defaults: &Defaults, overrides: ConfigOverrides) -> Result<ResolvedConfig> {
    let billing_project =
        non_empty(overrides.billing_project).unwrap_or_else(|| defaults.billing_project.clone());
    let source_project =
        non_empty(overrides.source_project).unwrap_or_else(|| billing_project.clone());
    let results_project =
        non_empty(overrides.results_project).unwrap_or_else(|| billing_project.clone());

    let limit = overrides.limit.filter(|&l| l != 0);
    let limit_clause = limit.map(|l| format!("LIMIT {l}")).unwrap_or_default();
    let min_stay_clause = overrides
        .min_stay_hours
        .map(|h| {
            format!("WHERE DATETIME_DIFF(visit_end_datetime, visit_start_datetime, HOUR) > {h}")
        })
        .unwrap_or_default();

    let page_size = overrides.page_size.unwrap_or(defaults.page_size);
    if page_size == 0 {
        return Err(LabelerError::config("page_size must be positive"));
    }

    let config = ResolvedConfig {
        credentials_path: overrides
            .credentials_path
            .unwrap_or_else(|| defaults.credentials_path.clone()),
        billing_project,
        source_project,
        source_dataset: non_empty(overrides.source_dataset)
            .unwrap_or_else(|| defaults.source_dataset.clone()),
        results_project,
        results_dataset: non_empty(overrides.results_dataset)
            .unwrap_or_else(|| defaults.results_dataset.clone()),
        temp_dataset: non_empty(overrides.temp_dataset)
            .unwrap_or_else(|| defaults.temp_dataset.clone()),
        cohort_name: non_empty(overrides.cohort_name)
            .unwrap_or_else(|| defaults.cohort_name.clone()),
        filtered_cohort_name: non_empty(overrides.filtered_cohort_name)
            .unwrap_or_else(|| defaults.filtered_cohort_name.clone()),
        target_table: non_empty(overrides.target_table)
            .unwrap_or_else(|| defaults.target_table.clone()),
        window_start_field: non_empty(overrides.window_start_field)
            .unwrap_or_else(|| defaults.window_start_field.clone()),
        window_end_field: non_empty(overrides.window_end_field)
            .unwrap_or_else(|| defaults.window_end_field.clone()),
        limit,
        min_stay_hours: overrides.min_stay_hours,
        extract_flowsheets: overrides.extract_flowsheets.unwrap_or(false),
        flowsheet_table: non_empty(overrides.flowsheet_table)
            .unwrap_or_else(|| defaults.flowsheet_table.clone()),
        page_size,
        limit_clause,
        min_stay_clause,
    };

    config.validate()?;
    Ok(config)
}

impl ResolvedConfig {
    /// Resolve overrides against the built-in defaults
    pub fn from_overrides(overrides: ConfigOverrides) -> Result<Self> {
        resolve(&Defaults::default(), overrides)
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("billing_project", &self.billing_project),
            ("source_project", &self.source_project),
            ("source_dataset", &self.source_dataset),
            ("results_project", &self.results_project),
            ("results_dataset", &self.results_dataset),
            ("temp_dataset", &self.temp_dataset),
            ("cohort_name", &self.cohort_name),
            ("filtered_cohort_name", &self.filtered_cohort_name),
            ("target_table", &self.target_table),
            ("window_start_field", &self.window_start_field),
            ("window_end_field", &self.window_end_field),
            ("flowsheet_table", &self.flowsheet_table),
        ] {
            validate_identifier(key, value)?;
        }
        if self.window_start_field == self.window_end_field {
            return Err(LabelerError::config(
                "window_start_field and window_end_field must differ",
            ));
        }
        Ok(())
    }

    /// Fully qualified cohort table
    #[must_use]
    pub fn cohort_table(&self) -> String {
        format!(
            "{}.{}.{}",
            self.results_project, self.results_dataset, self.cohort_name
        )
    }

    /// Fully qualified label target table
    #[must_use]
    pub fn target_table_path(&self) -> String {
        format!(
            "{}.{}.{}",
            self.results_project, self.results_dataset, self.target_table
        )
    }

    /// Fully qualified name of a table in the temporary dataset
    #[must_use]
    pub fn temp_table_path(&self, table: &str) -> String {
        format!("{}.{}.{}", self.results_project, self.temp_dataset, table)
    }

    /// Placeholder values shared by every SQL template
    #[must_use]
    pub fn template_context(&self) -> TemplateContext {
        TemplateContext::new()
            .with("source_project", &self.source_project)
            .with("source_dataset", &self.source_dataset)
            .with("results_project", &self.results_project)
            .with("results_dataset", &self.results_dataset)
            .with("temp_dataset", &self.temp_dataset)
            .with("cohort_name", &self.cohort_name)
            .with("filtered_cohort_name", &self.filtered_cohort_name)
            .with("target_table", &self.target_table)
            .with("window_start", &self.window_start_field)
            .with("window_end", &self.window_end_field)
            .with("limit_clause", &self.limit_clause)
            .with("min_stay_clause", &self.min_stay_clause)
    }
}

impl fmt::Display for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  Billing Project: {}", self.billing_project)?;
        writeln!(
            f,
            "  Source: {}.{}",
            self.source_project, self.source_dataset
        )?;
        writeln!(f, "  Cohort Table: {}", self.cohort_table())?;
        writeln!(f, "  Target Table: {}", self.target_table_path())?;
        writeln!(
            f,
            "  Window: [{}, {}]",
            self.window_start_field, self.window_end_field
        )?;
        if let Some(limit) = self.limit {
            writeln!(f, "  Limit: {limit}")?;
        }
        if let Some(hours) = self.min_stay_hours {
            writeln!(f, "  Minimum Stay (hours): {hours}")?;
        }
        Ok(())
    }
}
