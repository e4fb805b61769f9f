//! Flowsheet extraction from the OMOP observation table.
//!
//! Flowsheet rows are stored as JSON arrays in `observation.value_as_string`
//! under a custom concept id. The extraction flattens them into a regular table
//! with one row per observation. The extract is very large (billions of rows),
//! so by default an existing target table is left untouched.

use crate::config::ResolvedConfig;

/// Custom concept id marking observation rows that carry flowsheet JSON
pub const FLOWSHEET_CONCEPT_ID: i64 = 2_000_006_253;

/// Parameters of a flowsheet extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowsheetExtraction {
    pub source_project: String,
    pub source_dataset: String,
    pub target_project: String,
    pub target_dataset: String,
    pub target_table: String,
    pub flowsheet_concept_id: i64,
    /// Replace the target table instead of creating it only when absent
    pub overwrite: bool,
}

impl FlowsheetExtraction {
    /// Extraction from the configured source into the results dataset
    #[must_use]
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            source_project: config.source_project.clone(),
            source_dataset: config.source_dataset.clone(),
            target_project: config.results_project.clone(),
            target_dataset: config.results_dataset.clone(),
            target_table: config.flowsheet_table.clone(),
            flowsheet_concept_id: FLOWSHEET_CONCEPT_ID,
            overwrite: false,
        }
    }

    #[must_use]
    pub const fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Fully qualified target table
    #[must_use]
    pub fn target_path(&self) -> String {
        format!(
            "{}.{}.{}",
            self.target_project, self.target_dataset, self.target_table
        )
    }

    /// Render the extraction statement
    #[must_use]
    pub fn to_sql(&self) -> String {
        let create = if self.overwrite {
            "CREATE OR REPLACE TABLE"
        } else {
            "CREATE TABLE IF NOT EXISTS"
        };
        let observation = format!(
            "`{}.{}.observation`",
            self.source_project, self.source_dataset
        );
        let concept = format!("`{}.{}.concept`", self.source_project, self.source_dataset);
        let id = self.flowsheet_concept_id;

        let component = |name: &str, json_column: &str, source: &str| {
            format!(
                "{name} AS (
      SELECT observation_id,
        JSON_EXTRACT_SCALAR(v, '$.value') AS val_value
      FROM {observation} ob
      LEFT JOIN UNNEST(JSON_EXTRACT_ARRAY({json_column}, '$.values')) AS v
      WHERE ob.observation_concept_id = {id}
        AND JSON_VALUE(v, '$.source') = \"{source}\"
    )"
            )
        };

        format!(
            "{create} `{target}` AS
    (
    WITH {meas},
    {disp},
    {unit},
    {src}
    SELECT ob.observation_id, ob.person_id, ob.observation_datetime,
      CASE
        WHEN ob.observation_concept_id = {id} THEN src.val_value
        ELSE ob.observation_source_value
      END AS source_display_name,
      CASE
        WHEN ob.observation_concept_id = {id} THEN disp.val_value
        ELSE cpt.concept_name
      END AS display_name,
      CASE
        WHEN ob.observation_concept_id = {id} THEN meas.val_value
        WHEN value_as_string IS NOT NULL THEN value_as_string
        ELSE CAST(value_as_number AS STRING)
      END AS meas_value,
      CASE
        WHEN ob.observation_concept_id = {id} THEN unit.val_value
        ELSE ob.unit_source_value
      END AS units
    FROM {observation} ob
    LEFT JOIN meas ON ob.observation_id = meas.observation_id
    LEFT JOIN unit ON ob.observation_id = unit.observation_id
    LEFT JOIN disp ON ob.observation_id = disp.observation_id
    LEFT JOIN src ON ob.observation_id = src.observation_id
    LEFT JOIN {concept} cpt ON cpt.concept_id = ob.observation_source_concept_id
    );
    ",
            target = self.target_path(),
            meas = component("meas", "value_as_string", "ip_flwsht_meas.meas_value"),
            disp = component("disp", "value_as_string", "ip_flo_gp_data.disp_name"),
            unit = component("unit", "value_as_string", "ip_flo_gp_data.units"),
            src = component("src", "observation_source_value", "ip_flt_data.display_name"),
        )
    }
}
