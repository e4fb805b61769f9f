//! Cohort definitions
//!
//! A cohort is described by three SQL templates: a base query selecting the
//! source rows, a transform query turning them into cohort rows, and a create
//! statement materializing the transform into the results dataset.

pub mod admissions;
pub mod records;

use std::time::Instant;

use crate::config::ResolvedConfig;
use crate::error::{LabelerError, Result};
use crate::sql::{SqlTemplate, TemplateContext};
use crate::utils::logging::{log_operation_complete, log_operation_start};
use crate::warehouse::Warehouse;

pub use admissions::{AdmissionCohort, AdmissionFilteredCohort, CohortCheck, verify_admission_cohort};

const CREATE_TEMPLATE: &str = "CREATE OR REPLACE TABLE {results_project}.{results_dataset}.{cohort_table} AS
{query}";

/// A cohort definition rendered against a resolved configuration
pub trait Cohort {
    /// Short identifier of the cohort
    fn name(&self) -> &'static str;

    /// Table written by [`Cohort::create_query`], without project and dataset
    fn table_name<'a>(&self, config: &'a ResolvedConfig) -> &'a str;

    fn base_template(&self) -> SqlTemplate;

    /// Transform over the rendered base query, available as `{base_query}`
    fn transform_template(&self) -> SqlTemplate;

    fn base_query(&self, config: &ResolvedConfig) -> Result<String> {
        self.base_template().render(&config.template_context())
    }

    fn transform_query(&self, config: &ResolvedConfig) -> Result<String> {
        let context = config
            .template_context()
            .with("base_query", self.base_query(config)?);
        self.transform_template().render(&context)
    }

    fn create_query(&self, config: &ResolvedConfig) -> Result<String> {
        let context = config
            .template_context()
            .with("cohort_table", self.table_name(config))
            .with("query", self.transform_query(config)?);
        SqlTemplate::new(CREATE_TEMPLATE).render(&context)
    }

    /// Render and run the create statement
    fn create(&self, warehouse: &dyn Warehouse, config: &ResolvedConfig) -> Result<()> {
        let sql = self.create_query(config)?;
        let table = format!(
            "{}.{}.{}",
            config.results_project,
            config.results_dataset,
            self.table_name(config)
        );
        let start = Instant::now();
        log_operation_start(&format!("Creating {} cohort table", self.name()), &table);
        log::debug!("{sql}");
        warehouse.execute(&sql)?;
        log_operation_complete("created", &table, None, Some(start.elapsed()));
        Ok(())
    }
}

/// Build a cohort from its name
pub fn cohort_from_name(name: &str) -> Result<Box<dyn Cohort>> {
    match name.to_lowercase().as_str() {
        "admissions" => Ok(Box::new(AdmissionCohort)),
        "admissions_filtered" => Ok(Box::new(AdmissionFilteredCohort)),
        _ => Err(LabelerError::config(format!("Unknown cohort: {name}"))),
    }
}

/// Create the admission cohort table, followed by the one-admission-per-patient
/// table when `filtered` is set
pub fn create_cohort_table(
    warehouse: &dyn Warehouse,
    config: &ResolvedConfig,
    filtered: bool,
) -> Result<()> {
    AdmissionCohort.create(warehouse, config)?;
    if filtered {
        AdmissionFilteredCohort.create(warehouse, config)?;
    }
    Ok(())
}

/// Render an arbitrary template against the configuration
pub fn render_with_config(
    template: &SqlTemplate,
    config: &ResolvedConfig,
    extra: &TemplateContext,
) -> Result<String> {
    template.render(&config.template_context().merged(extra))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use crate::utils::test::RecordingWarehouse;

    #[test]
    fn test_cohort_from_name() {
        assert_eq!(cohort_from_name("Admissions").unwrap().name(), "admissions");
        assert!(cohort_from_name("outpatient").is_err());
    }

    #[test]
    fn test_create_filtered_runs_both() {
        let config = ResolvedConfig::from_overrides(ConfigOverrides::default()).unwrap();
        let warehouse = RecordingWarehouse::new();
        create_cohort_table(&warehouse, &config, true).unwrap();

        let statements = warehouse.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("som-nero-nigam-starr.temp_dataset.temp_cohort AS"));
        assert!(statements[1].contains("som-nero-nigam-starr.temp_dataset.temp_cohort_filtered AS"));
    }

    #[test]
    fn test_render_with_config() {
        let config = ResolvedConfig::from_overrides(ConfigOverrides::default()).unwrap();
        let sql = render_with_config(
            &SqlTemplate::new("SELECT {column} FROM {results_dataset}.{cohort_name}"),
            &config,
            &TemplateContext::new().with("column", "person_id"),
        )
        .unwrap();
        assert_eq!(sql, "SELECT person_id FROM temp_dataset.temp_cohort");
    }
}
