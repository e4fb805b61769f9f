//! Admission cohorts
//!
//! [`AdmissionCohort`] rolls inpatient and emergency-inpatient visits up into
//! admissions with the endpoint sweep of [`crate::algorithm::interval`],
//! expressed as window functions. [`AdmissionFilteredCohort`] keeps one
//! pseudo-randomly chosen admission per patient.

use rustc_hash::FxHashSet;

use super::Cohort;
use super::records::{admissions_from_batches, visits_from_batches};
use crate::algorithm::{CanonicalAdmission, reconstruct_admissions};
use crate::config::ResolvedConfig;
use crate::error::Result;
use crate::sql::SqlTemplate;
use crate::warehouse::Warehouse;

/// OMOP visit concepts: inpatient visit, emergency room and inpatient visit
pub const ADMISSION_VISIT_CONCEPTS: [i64; 2] = [9201, 262];

const ADMISSION_BASE: &str = "(
    SELECT * FROM (
        SELECT
            v.person_id,
            v.visit_concept_id,
            v.visit_start_datetime,
            v.visit_end_datetime
        FROM {source_project}.{source_dataset}.visit_occurrence v
        INNER JOIN {source_project}.{source_dataset}.person p
            ON v.person_id = p.person_id
        WHERE
            v.visit_concept_id IN ({visit_concepts})
            AND v.visit_start_datetime IS NOT NULL
            AND v.visit_end_datetime IS NOT NULL
            AND v.visit_end_datetime > v.visit_start_datetime
    )
    {min_stay_clause}
    {limit_clause}
)";

const ADMISSION_TRANSFORM: &str = "WITH visits AS (
    SELECT * FROM {base_query}
),
endpoints AS (
    SELECT person_id, visit_start_datetime AS endpoint_date, 1 AS delta FROM visits
    UNION ALL
    SELECT person_id, visit_end_datetime AS endpoint_date, -1 AS delta FROM visits
),
netted AS (
    SELECT person_id, endpoint_date, SUM(delta) AS net
    FROM endpoints
    GROUP BY person_id, endpoint_date
),
running AS (
    SELECT
        person_id,
        endpoint_date,
        SUM(net) OVER (PARTITION BY person_id ORDER BY endpoint_date) AS open_visits,
        ROW_NUMBER() OVER (PARTITION BY person_id ORDER BY endpoint_date) AS endpoint_number
    FROM netted
),
discharges AS (
    SELECT
        person_id,
        endpoint_date AS discharge_date,
        ROW_NUMBER() OVER (PARTITION BY person_id ORDER BY endpoint_date) AS admission_number
    FROM running
    WHERE open_visits = 0
),
admits AS (
    SELECT
        r.person_id,
        r.endpoint_date AS admit_date,
        ROW_NUMBER() OVER (PARTITION BY r.person_id ORDER BY r.endpoint_date) AS admission_number
    FROM running r
    LEFT JOIN running prev
        ON r.person_id = prev.person_id
        AND r.endpoint_number = prev.endpoint_number + 1
    WHERE prev.person_id IS NULL OR prev.open_visits = 0
)
SELECT person_id, admit_date, discharge_date
FROM admits
INNER JOIN discharges USING (person_id, admission_number)
ORDER BY person_id, admit_date";

const FILTERED_BASE: &str = "(
    SELECT * FROM {results_project}.{results_dataset}.{cohort_name}
)";

const FILTERED_TRANSFORM: &str = "SELECT * EXCEPT (rnd, pos)
FROM (
    SELECT *, ROW_NUMBER() OVER (PARTITION BY person_id ORDER BY rnd) AS pos
    FROM (
        SELECT
            *,
            FARM_FINGERPRINT(CONCAT(
                CAST(person_id AS STRING),
                CAST(admit_date AS STRING),
                CAST(discharge_date AS STRING)
            )) AS rnd
        FROM {base_query}
    )
)
WHERE pos = 1
ORDER BY person_id, admit_date";

/// Inpatient admissions built from overlapping visits
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionCohort;

impl Cohort for AdmissionCohort {
    fn name(&self) -> &'static str {
        "admissions"
    }

    fn table_name<'a>(&self, config: &'a ResolvedConfig) -> &'a str {
        &config.cohort_name
    }

    fn base_template(&self) -> SqlTemplate {
        let visit_concepts = crate::sql::id_list(&ADMISSION_VISIT_CONCEPTS);
        SqlTemplate::new(ADMISSION_BASE.replace("{visit_concepts}", &visit_concepts))
    }

    fn transform_template(&self) -> SqlTemplate {
        SqlTemplate::new(ADMISSION_TRANSFORM)
    }
}

/// One admission per patient, chosen by a fingerprint of the admission
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionFilteredCohort;

impl Cohort for AdmissionFilteredCohort {
    fn name(&self) -> &'static str {
        "admissions_filtered"
    }

    fn table_name<'a>(&self, config: &'a ResolvedConfig) -> &'a str {
        &config.filtered_cohort_name
    }

    fn base_template(&self) -> SqlTemplate {
        SqlTemplate::new(FILTERED_BASE)
    }

    fn transform_template(&self) -> SqlTemplate {
        SqlTemplate::new(FILTERED_TRANSFORM)
    }
}

/// Comparison of a warehouse cohort table with the in-process reconstruction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortCheck {
    pub visits: usize,
    pub expected: usize,
    pub actual: usize,
    /// Reconstructed admissions absent from the table
    pub missing: Vec<CanonicalAdmission>,
    /// Table rows the reconstruction does not produce
    pub unexpected: Vec<CanonicalAdmission>,
}

impl CohortCheck {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }

    /// Compare two admission sets
    #[must_use]
    pub fn compare(
        visits: usize,
        expected: &[CanonicalAdmission],
        actual: &[CanonicalAdmission],
    ) -> Self {
        let expected_set: FxHashSet<_> = expected.iter().collect();
        let actual_set: FxHashSet<_> = actual.iter().collect();
        let mut missing: Vec<_> = expected
            .iter()
            .filter(|a| !actual_set.contains(a))
            .copied()
            .collect();
        let mut unexpected: Vec<_> = actual
            .iter()
            .filter(|a| !expected_set.contains(a))
            .copied()
            .collect();
        missing.sort_unstable();
        unexpected.sort_unstable();

        Self {
            visits,
            expected: expected.len(),
            actual: actual.len(),
            missing,
            unexpected,
        }
    }
}

/// Re-derive the admission cohort in process and compare it with the table
///
/// The base query is read back from the warehouse, so a configured row limit
/// without a deterministic order can make the two sides disagree.
pub fn verify_admission_cohort(
    warehouse: &dyn Warehouse,
    config: &ResolvedConfig,
) -> Result<CohortCheck> {
    let cohort = AdmissionCohort;
    let visits_sql = format!(
        "SELECT person_id, visit_start_datetime, visit_end_datetime FROM {}",
        cohort.base_query(config)?
    );
    let visits = visits_from_batches(&warehouse.read_query(&visits_sql, config.page_size)?)?;
    let expected = reconstruct_admissions(&visits)?;

    let cohort_sql = format!(
        "SELECT person_id, admit_date, discharge_date FROM {}",
        config.cohort_table()
    );
    let actual = admissions_from_batches(
        &warehouse.read_query(&cohort_sql, config.page_size)?,
        "admit_date",
        "discharge_date",
    )?;

    let check = CohortCheck::compare(visits.len(), &expected, &actual);
    if check.is_consistent() {
        log::info!(
            "Cohort table {} matches {} reconstructed admissions",
            config.cohort_table(),
            check.expected
        );
    } else {
        log::warn!(
            "Cohort table {} differs from reconstruction: {} missing, {} unexpected",
            config.cohort_table(),
            check.missing.len(),
            check.unexpected.len()
        );
    }
    Ok(check)
}
