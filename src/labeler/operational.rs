//! Operational outcome labels: mortality, length of stay, ICU admission and
//! readmission

use crate::sql::SqlTemplate;

/// `visit_detail_source_value` of care units counted as intensive care
pub const ICU_CARE_UNITS: [&str; 21] = [
    "J4|J4|J4|",
    "J2|J2|J2|",
    "K4|K4|K4|",
    "M4|M4|M4|",
    "L4|L4|L4|",
    "ACA6 ICU|ACA6ICU|ACA6ICU|",
    "E2-ICU|E2|E2-ICU|Intensive Care",
    "VCP CCU 2|VCPC2|VCP CCU 2|Critical Care Medicine",
    "VCP CCU 1|VCPC1|VCP CCU 1|Critical Care Medicine",
    "D2ICU-SURGE|D2ICU|D2ICU|Intensive Care",
    "2 NORTH|2NCVICU|Cardiovascular Intensive Care|",
    "CVICU 220|CVICU220|Cardiovascular Intensive Care 220|",
    "CVICU 320|CVICU320|Cardiovascular Intensive Care 320|",
    "CVICU|CVICU|Cardiovascular Intensive Care|",
    "E29-ICU|NICU|E29-ICU|Intensive Care",
    "NICU 260|NICU260|Neonatal Intensive Care|Neonatology",
    "NICU 270|NICU270|Neonatal Intensive Care|Neonatology",
    "PICU 320|PICU320|Pediatric Intensive Care 320|",
    "PICU 420|PICU420|Pediatric Intensive Care 420|",
    "PICU|PICU|Pediatric Intensive Care|",
    "VCP NICU|VCPNICU|VCP NICU|Neonatology",
];

/// Minimum window length in days for a positive `los_7` label
pub const LONG_STAY_DAYS: i64 = 7;
/// Maximum gap in days between discharge and the next admission for a
/// positive `readmission_30` label
pub const READMISSION_DAYS: i64 = 30;

// Death is recorded by date only, so the window is compared at date granularity
const MORTALITY: &str = "WITH deaths AS (
    SELECT
        t1.person_id,
        t1.{window_start},
        t1.{window_end},
        MAX(IF(d.death_date BETWEEN CAST(t1.{window_start} AS DATE) AND CAST(t1.{window_end} AS DATE), 1, 0)) AS mortality_label,
        MIN(d.death_date) AS death_date
    FROM {results_project}.{results_dataset}.{cohort_name} t1
    INNER JOIN {source_project}.{source_dataset}.death d
        ON t1.person_id = d.person_id
    GROUP BY t1.person_id, t1.{window_start}, t1.{window_end}
)
SELECT
    person_id,
    {window_start},
    {window_end},
    IFNULL(mortality_label, 0) AS mortality_label,
    death_date
FROM {results_project}.{results_dataset}.{cohort_name}
LEFT JOIN deaths USING (person_id, {window_start}, {window_end})";

const LENGTH_OF_STAY: &str = "SELECT
    person_id,
    {window_start},
    {window_end},
    DATE_DIFF({window_end}, {window_start}, DAY) AS los_days,
    CAST(DATE_DIFF({window_end}, {window_start}, DAY) >= {long_stay_days} AS INT64) AS los_7_label
FROM {results_project}.{results_dataset}.{cohort_name}";

const ICU_ADMISSION: &str = "WITH icu AS (
    SELECT
        t1.person_id,
        t1.{window_start},
        t1.{window_end},
        MIN(d.visit_detail_start_datetime) AS icu_start_datetime
    FROM {results_project}.{results_dataset}.{cohort_name} t1
    INNER JOIN {source_project}.{source_dataset}.visit_detail d
        ON t1.person_id = d.person_id
        AND d.visit_detail_start_datetime BETWEEN t1.{window_start} AND t1.{window_end}
        AND d.visit_detail_source_value IN ({icu_care_units})
    GROUP BY t1.person_id, t1.{window_start}, t1.{window_end}
)
SELECT
    person_id,
    {window_start},
    {window_end},
    IF(icu_start_datetime IS NULL, 0, 1) AS icu_admission_label,
    icu_start_datetime
FROM {results_project}.{results_dataset}.{cohort_name}
LEFT JOIN icu USING (person_id, {window_start}, {window_end})";

const READMISSION: &str = "WITH ordered AS (
    SELECT
        person_id,
        {window_start},
        {window_end},
        LEAD({window_start}) OVER (PARTITION BY person_id ORDER BY {window_start}) AS next_start
    FROM {results_project}.{results_dataset}.{cohort_name}
)
SELECT
    person_id,
    {window_start},
    {window_end},
    IF(DATE_DIFF(next_start, {window_end}, DAY) BETWEEN 0 AND {readmission_days}, 1, 0) AS readmission_30_label,
    DATE_DIFF(next_start, {window_end}, DAY) AS readmission_window
FROM ordered";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operational {
    Mortality,
    LengthOfStay7,
    IcuAdmission,
    Readmission30,
}

impl Operational {
    /// Operational labelers in the default registry
    pub const REGISTERED: [Self; 3] = [Self::Mortality, Self::LengthOfStay7, Self::IcuAdmission];

    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Mortality => "mortality",
            Self::LengthOfStay7 => "los_7",
            Self::IcuAdmission => "icu_admission",
            Self::Readmission30 => "readmission_30",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Mortality => "1 if death occured within the specified time window, 0 otherwise.",
            Self::LengthOfStay7 => {
                "1 if length of the specified time window is at least 7 days, 0 otherwise"
            }
            Self::IcuAdmission => "1 if admitted to ICU during specified time window, 0 otherwise",
            Self::Readmission30 => {
                "1 if readmission occurred within 30 days from the end of the specified time window, 0 otherwise"
            }
        }
    }

    #[must_use]
    pub fn template(self) -> SqlTemplate {
        let text = match self {
            Self::Mortality => MORTALITY.to_string(),
            Self::LengthOfStay7 => {
                LENGTH_OF_STAY.replace("{long_stay_days}", &LONG_STAY_DAYS.to_string())
            }
            Self::IcuAdmission => {
                let units = ICU_CARE_UNITS
                    .iter()
                    .map(|unit| format!("'{unit}'"))
                    .collect::<Vec<_>>()
                    .join(",\n            ");
                ICU_ADMISSION.replace("{icu_care_units}", &units)
            }
            Self::Readmission30 => {
                READMISSION.replace("{readmission_days}", &READMISSION_DAYS.to_string())
            }
        };
        SqlTemplate::new(text)
    }
}
