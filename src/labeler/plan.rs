//! Label table plans
//!
//! A label run is an explicit ordered plan: optionally extract flowsheets,
//! create one temporary table per labeler, join them onto the cohort into the
//! target table, then drop the temporary tables. Steps run one at a time and
//! a failure stops the plan without undoing earlier steps.

use std::fmt;
use std::time::Instant;

use rand::Rng;

use super::{Labeler, LabelerRegistry};
use crate::config::ResolvedConfig;
use crate::error::{LabelerError, Result};
use crate::sql::FlowsheetExtraction;
use crate::utils::logging::{log_operation_complete, log_operation_start};
use crate::warehouse::Warehouse;

/// Length of the random temporary table suffix
pub const SUFFIX_LEN: usize = 5;

/// Kind of a plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    ExtractFlowsheets,
    CreateTemp,
    CreateTarget,
    DropTemp,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExtractFlowsheets => "extract flowsheets",
            Self::CreateTemp => "create temporary table",
            Self::CreateTarget => "create target table",
            Self::DropTemp => "drop temporary table",
        };
        write!(f, "{name}")
    }
}

/// One statement of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub kind: StepKind,
    pub description: String,
    /// Fully qualified table the step writes or drops
    pub table: String,
    pub sql: String,
}

/// Ordered statements creating a label table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPlan {
    suffix: String,
    labeler_ids: Vec<&'static str>,
    steps: Vec<PlanStep>,
}

impl LabelPlan {
    /// Suffix shared by every temporary table of this plan
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    #[must_use]
    pub fn labeler_ids(&self) -> &[&'static str] {
        &self.labeler_ids
    }

    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// All statements as one script
    #[must_use]
    pub fn to_script(&self) -> String {
        self.steps
            .iter()
            .map(|step| format!("-- {}\n{};\n", step.description, step.sql))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Run every step in order, stopping at the first failure
    pub fn execute(&self, warehouse: &dyn Warehouse) -> Result<()> {
        let total = self.steps.len();
        let start = Instant::now();
        for (i, step) in self.steps.iter().enumerate() {
            let step_start = Instant::now();
            log_operation_start(
                &format!("[{}/{total}] {}", i + 1, step.description),
                &step.table,
            );
            log::debug!("{}", step.sql);
            warehouse.execute(&step.sql).inspect_err(|e| {
                log::error!("Step {} of {total} failed ({}): {e}", i + 1, step.kind);
            })?;
            log_operation_complete(
                &step.kind.to_string(),
                &step.table,
                None,
                Some(step_start.elapsed()),
            );
        }
        log::info!(
            "Label plan with {} labelers completed in {:.2?}",
            self.labeler_ids.len(),
            start.elapsed()
        );
        Ok(())
    }
}

/// Random lowercase suffix for temporary tables
#[must_use]
pub fn random_suffix() -> String {
    suffix_from_rng(&mut rand::rng())
}

/// Lowercase suffix drawn from `rng`
pub fn suffix_from_rng<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SUFFIX_LEN)
        .map(|_| char::from(rng.random_range(b'a'..=b'z')))
        .collect()
}

/// Build the plan for the selected labelers with a random suffix
///
/// # Errors
/// Returns [`LabelerError::UnknownLabeler`] for an unregistered id and
/// [`LabelerError::Config`] when the selection is empty. Nothing is
/// dispatched in either case.
pub fn label_plan<S: AsRef<str>>(
    registry: &LabelerRegistry,
    config: &ResolvedConfig,
    include: Option<&[S]>,
    exclude: &[S],
) -> Result<LabelPlan> {
    let labelers = registry.select(include, exclude)?;
    build_plan(&labelers, config, random_suffix())
}

/// Build the plan for `labelers` with a fixed temporary table suffix
pub fn build_plan(
    labelers: &[Labeler],
    config: &ResolvedConfig,
    suffix: String,
) -> Result<LabelPlan> {
    if labelers.is_empty() {
        return Err(LabelerError::config("No labelers selected"));
    }

    let mut steps = Vec::with_capacity(labelers.len() * 2 + 2);

    if config.extract_flowsheets {
        let extraction = FlowsheetExtraction::from_config(config);
        steps.push(PlanStep {
            kind: StepKind::ExtractFlowsheets,
            description: "Extracting flowsheets".to_string(),
            table: extraction.target_path(),
            sql: extraction.to_sql(),
        });
    }

    let mut temp_tables = Vec::with_capacity(labelers.len());
    for labeler in labelers {
        let table = config.temp_table_path(&format!("temp_{}_{suffix}", labeler.id()));
        let query = labeler.query(config)?;
        steps.push(PlanStep {
            kind: StepKind::CreateTemp,
            description: format!("Running labeler {}", labeler.id()),
            sql: format!("CREATE OR REPLACE TABLE {table} AS\n{query}"),
            table: table.clone(),
        });
        temp_tables.push(table);
    }

    let target = config.target_table_path();
    let keys = format!(
        "person_id, {}, {}",
        config.window_start_field, config.window_end_field
    );
    let joins: String = temp_tables
        .iter()
        .map(|table| format!("\nLEFT JOIN {table} USING ({keys})"))
        .collect();
    steps.push(PlanStep {
        kind: StepKind::CreateTarget,
        description: format!("Joining {} labels onto the cohort", labelers.len()),
        sql: format!(
            "CREATE OR REPLACE TABLE {target} AS\nSELECT *\nFROM {}{joins}",
            config.cohort_table()
        ),
        table: target,
    });

    for table in temp_tables {
        steps.push(PlanStep {
            kind: StepKind::DropTemp,
            description: "Dropping temporary table".to_string(),
            sql: format!("DROP TABLE IF EXISTS {table}"),
            table,
        });
    }

    Ok(LabelPlan {
        suffix,
        labeler_ids: labelers.iter().map(Labeler::id).collect(),
        steps,
    })
}

/// Build and run the label plan
///
/// Returns the executed plan. An invalid selection fails before anything is
/// sent to the warehouse.
pub fn create_label_table<S: AsRef<str>>(
    warehouse: &dyn Warehouse,
    registry: &LabelerRegistry,
    config: &ResolvedConfig,
    include: Option<&[S]>,
    exclude: &[S],
) -> Result<LabelPlan> {
    let plan = label_plan(registry, config, include, exclude)?;
    log::info!(
        "Creating label table {} with labelers: {}",
        config.target_table_path(),
        plan.labeler_ids.join(", ")
    );
    plan.execute(warehouse)?;
    Ok(plan)
}
