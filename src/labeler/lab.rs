//! Lab-based labels
//!
//! Each lab label is a declarative [`LabDefinition`]: measurement concepts,
//! accepted units with their conversion to one canonical unit, the window
//! extremum, three severity tiers and an optional reference-range rule. The
//! query is generated from the definition, and the same definition drives the
//! in-process evaluation in [`crate::algorithm::window`].
//!
//! The generated query has the shape
//!
//! ```text
//! measurements      source-specific normalized values per patient
//! all_measurements  joined to the cohort windows
//! windowed          restricted to [window_start, window_end]
//! extremum          MIN or MAX per window
//! flagged           one 0/1 column per tier and for the range rule
//! first_<tier>      earliest flagged measurement per window
//! ```
//!
//! and returns one row per cohort window.

use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;

use crate::algorithm::baseline::{BASELINE_LOOKBACK_DAYS, CREATININE_MG_PER_UMOL, age_norm_sql};
use crate::algorithm::{
    Extremum, LabCriteria, Measurement, RangeRule, SeverityTier, Threshold, TierRule, TierSpec,
    UnitConversion, Window, WindowedLabel, baseline_creatinine, evaluate_windows,
};
use crate::sql::{SqlTemplate, id_list};

/// White blood cell count
pub const WBC_CONCEPT_ID: i64 = 3_010_813;
/// Band form neutrophils per 100 leukocytes
pub const BAND_PERCENT_CONCEPT_ID: i64 = 3_035_839;
/// Band form neutrophil count
pub const BAND_COUNT_CONCEPT_ID: i64 = 3_018_199;
/// Thousands per microliter
pub const THOUSANDS_PER_UL: i64 = 8848;
/// Thousands per cubic millimeter, equivalent to [`THOUSANDS_PER_UL`]
pub const THOUSANDS_PER_MM3: i64 = 8961;
/// Cells per microliter
pub const CELLS_PER_UL: i64 = 8784;
pub const PERCENT: i64 = 8554;

/// How measurement values are obtained for a lab label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabSource {
    /// Measurements of the label's concepts in one of the accepted units
    Standard,
    /// Standard measurements, with tiers relative to a per-window baseline
    CreatinineBaseline,
    /// Absolute neutrophil count: neutrophils plus bands, derived from
    /// percentages through the simultaneous WBC count, falling back to WBC
    NeutrophilsWithBands,
}

/// Declarative definition of a lab label
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabDefinition {
    pub id: &'static str,
    pub description: &'static str,
    /// Analyte name used in the extremum column, e.g. `potassium`
    pub analyte: &'static str,
    /// Ancestor measurement concepts; descendants are included
    pub concept_ids: &'static [i64],
    pub source: LabSource,
    pub criteria: LabCriteria,
}

/// Patient attributes needed for the age and sex reference baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patient {
    pub birth_datetime: Option<NaiveDateTime>,
    pub gender_concept_id: i64,
}

const KEYS: &str = "person_id, {window_start}, {window_end}";

const MEASUREMENT_CONCEPTS: &str = "measurement_concepts AS (
    SELECT concept_id
    FROM {source_project}.{source_dataset}.concept
    WHERE concept_id IN ({concept_ids})

    UNION DISTINCT

    SELECT c.concept_id
    FROM {source_project}.{source_dataset}.concept c
    INNER JOIN {source_project}.{source_dataset}.concept_ancestor ca
        ON c.concept_id = ca.descendant_concept_id
        AND ca.ancestor_concept_id IN ({concept_ids})
        AND c.invalid_reason IS NULL
)";

const STANDARD_MEASUREMENTS: &str = "measurements AS (
    SELECT
        m.person_id,
        m.measurement_datetime,
        {value_expr} AS value_as_number,
        {low_expr} AS range_low,
        {high_expr} AS range_high
    FROM {source_project}.{source_dataset}.measurement m
    INNER JOIN measurement_concepts mc
        ON m.measurement_concept_id = mc.concept_id
    WHERE m.unit_concept_id IN ({unit_ids})
)";

const NEUTROPHIL_MEASUREMENTS: &str = "wbc_counts AS (
    SELECT
        m.person_id,
        m.measurement_datetime,
        m.value_as_number AS wbc
    FROM {source_project}.{source_dataset}.measurement m
    WHERE m.measurement_concept_id = {wbc_concept_id}
        AND m.unit_concept_id IN ({wbc_unit_ids})
),
band_counts AS (
    SELECT
        m.person_id,
        m.measurement_datetime,
        CASE
            WHEN m.measurement_concept_id = {band_percent_concept_id} AND m.value_as_number <= 100
                THEN m.value_as_number / 100 * w.wbc
            WHEN m.measurement_concept_id = {band_count_concept_id} AND m.unit_concept_id = {cells_per_ul}
                THEN m.value_as_number / 1000
        END AS bands_count
    FROM {source_project}.{source_dataset}.measurement m
    LEFT JOIN wbc_counts w
        ON m.person_id = w.person_id
        AND m.measurement_datetime = w.measurement_datetime
    WHERE m.measurement_concept_id IN ({band_percent_concept_id}, {band_count_concept_id})
),
neutrophil_counts AS (
    SELECT
        m.person_id,
        m.measurement_datetime,
        CASE
            WHEN m.unit_concept_id = {percent} AND m.value_as_number <= 100
                THEN m.value_as_number / 100 * w.wbc
            WHEN m.unit_concept_id = {percent} THEN NULL
            WHEN m.unit_concept_id = {cells_per_ul} THEN m.value_as_number / 1000
            ELSE m.value_as_number
        END AS neutrophils_count
    FROM {source_project}.{source_dataset}.measurement m
    INNER JOIN measurement_concepts mc
        ON m.measurement_concept_id = mc.concept_id
    LEFT JOIN wbc_counts w
        ON m.person_id = w.person_id
        AND m.measurement_datetime = w.measurement_datetime
    WHERE m.unit_concept_id IN ({neutrophil_unit_ids})
),
measurements AS (
    SELECT
        person_id,
        measurement_datetime,
        CASE
            WHEN neutrophils_count IS NOT NULL OR bands_count IS NOT NULL
                THEN IFNULL(neutrophils_count, 0) + IFNULL(bands_count, 0)
            ELSE wbc
        END AS value_as_number,
        CAST(NULL AS FLOAT64) AS range_low,
        CAST(NULL AS FLOAT64) AS range_high
    FROM neutrophil_counts
    FULL OUTER JOIN band_counts USING (person_id, measurement_datetime)
    FULL OUTER JOIN wbc_counts USING (person_id, measurement_datetime)
)";

const ALL_MEASUREMENTS: &str = "all_measurements AS (
    SELECT
        t1.person_id,
        t1.{window_start},
        t1.{window_end},
        m.measurement_datetime,
        m.value_as_number,
        m.range_low,
        m.range_high
    FROM {results_project}.{results_dataset}.{cohort_name} t1
    INNER JOIN measurements m
        ON t1.person_id = m.person_id
    WHERE m.value_as_number IS NOT NULL
)";

const WINDOWED: &str = "windowed AS (
    SELECT *
    FROM all_measurements
    WHERE measurement_datetime BETWEEN {window_start} AND {window_end}
)";

const BASELINES: &str = "lookback AS (
    SELECT person_id, {window_start}, {window_end}, MIN(value_as_number) AS baseline
    FROM all_measurements
    WHERE measurement_datetime >= DATETIME_SUB({window_start}, INTERVAL {lookback_days} DAY)
        AND measurement_datetime < {window_start}
    GROUP BY person_id, {window_start}, {window_end}
),
age_norm AS (
    SELECT person_id, {window_start}, {window_end}, {age_norm} AS baseline
    FROM (
        SELECT
            t1.person_id,
            t1.{window_start},
            t1.{window_end},
            p.gender_concept_id,
            DATE_DIFF(CAST(t1.{window_start} AS DATE), CAST(p.birth_datetime AS DATE), DAY) AS age_days
        FROM {results_project}.{results_dataset}.{cohort_name} t1
        LEFT JOIN {source_project}.{source_dataset}.person p
            ON t1.person_id = p.person_id
    )
),
baselines AS (
    SELECT person_id, {window_start}, {window_end}, COALESCE(l.baseline, a.baseline) AS baseline
    FROM age_norm a
    LEFT JOIN lookback l USING (person_id, {window_start}, {window_end})
),
windowed AS (
    SELECT *
    FROM all_measurements
    LEFT JOIN baselines USING (person_id, {window_start}, {window_end})
    WHERE measurement_datetime BETWEEN {window_start} AND {window_end}
)";

const FIRST_FLAGGED: &str = "first_{flag} AS (
    SELECT
        person_id,
        {window_start},
        {window_end},
        value_as_number AS {flag}_value,
        measurement_datetime AS {flag}_datetime{extra_columns}
    FROM flagged
    WHERE {flag} = 1
    QUALIFY ROW_NUMBER() OVER (
        PARTITION BY person_id, {window_start}, {window_end}
        ORDER BY measurement_datetime
    ) = 1
)";

/// Flag column of the reference-range rule
const RANGE_FLAG: &str = "abnormal_range";

/// `CASE` over the source unit converting `m.{column}`, or the bare column
/// when every accepted unit is canonical already
fn unit_case(units: &[UnitConversion], column: &str) -> String {
    let source = format!("m.{column}");
    let arms: Vec<String> = units
        .iter()
        .filter(|u| !u.is_identity())
        .map(|u| format!("WHEN {} THEN {}", u.unit_concept_id, u.to_sql(&source)))
        .collect();
    if arms.is_empty() {
        return source;
    }
    format!(
        "CASE m.unit_concept_id\n            {}\n            ELSE {source}\n        END",
        arms.join("\n            ")
    )
}

fn unit_ids(units: &[UnitConversion]) -> String {
    let ids: Vec<i64> = units.iter().map(|u| u.unit_concept_id).collect();
    id_list(&ids)
}

fn first_flagged(flag: &str, extra_columns: &str) -> String {
    FIRST_FLAGGED
        .replace("{flag}", flag)
        .replace("{extra_columns}", extra_columns)
}

impl LabDefinition {
    #[must_use]
    pub fn uses_baseline(&self) -> bool {
        self.criteria
            .tiers
            .iter()
            .any(|spec| matches!(spec.rule, TierRule::Baseline { .. }))
    }

    /// Name of the extremum output column without the labeler prefix,
    /// e.g. `max_potassium`
    #[must_use]
    pub fn extremum_column(&self) -> String {
        format!("{}_{}", self.criteria.extremum.prefix(), self.analyte)
    }

    fn measurements_sql(&self) -> String {
        let concepts = MEASUREMENT_CONCEPTS.replace("{concept_ids}", &id_list(self.concept_ids));
        let measurements = match self.source {
            LabSource::Standard | LabSource::CreatinineBaseline => {
                let units = self.criteria.units;
                STANDARD_MEASUREMENTS
                    .replace("{value_expr}", &unit_case(units, "value_as_number"))
                    .replace("{low_expr}", &unit_case(units, "range_low"))
                    .replace("{high_expr}", &unit_case(units, "range_high"))
                    .replace("{unit_ids}", &unit_ids(units))
            }
            LabSource::NeutrophilsWithBands => NEUTROPHIL_MEASUREMENTS
                .replace("{wbc_concept_id}", &WBC_CONCEPT_ID.to_string())
                .replace(
                    "{wbc_unit_ids}",
                    &id_list(&[THOUSANDS_PER_UL, THOUSANDS_PER_MM3]),
                )
                .replace(
                    "{band_percent_concept_id}",
                    &BAND_PERCENT_CONCEPT_ID.to_string(),
                )
                .replace("{band_count_concept_id}", &BAND_COUNT_CONCEPT_ID.to_string())
                .replace(
                    "{neutrophil_unit_ids}",
                    &id_list(&[THOUSANDS_PER_UL, PERCENT, CELLS_PER_UL, THOUSANDS_PER_MM3]),
                )
                .replace("{cells_per_ul}", &CELLS_PER_UL.to_string())
                .replace("{percent}", &PERCENT.to_string()),
        };
        format!("{concepts},\n{measurements}")
    }

    fn windowed_sql(&self) -> String {
        if self.uses_baseline() {
            BASELINES
                .replace("{lookback_days}", &BASELINE_LOOKBACK_DAYS.to_string())
                .replace("{age_norm}", &age_norm_sql("age_days", "gender_concept_id"))
        } else {
            WINDOWED.to_string()
        }
    }

    fn flagged_sql(&self) -> String {
        let mut flags: Vec<String> = self
            .criteria
            .tiers
            .iter()
            .map(|spec| {
                format!(
                    "IF({}, 1, 0) AS {}",
                    spec.rule.to_sql("value_as_number", "baseline"),
                    spec.tier.description()
                )
            })
            .collect();
        if let Some(rule) = self.criteria.range_rule {
            flags.push(format!(
                "IF({}, 1, 0) AS {RANGE_FLAG}",
                rule.to_sql("value_as_number")
            ));
        }
        format!(
            "flagged AS (\n    SELECT\n        *,\n        {}\n    FROM windowed\n)",
            flags.join(",\n        ")
        )
    }

    fn final_select(&self) -> String {
        let mut columns = vec![
            "person_id".to_string(),
            "{window_start}".to_string(),
            "{window_end}".to_string(),
            format!("extreme_value AS {{labeler_id}}_{}", self.extremum_column()),
        ];
        let mut joins = vec![format!("LEFT JOIN extremum USING ({KEYS})")];

        for spec in &self.criteria.tiers {
            let flag = spec.tier.description();
            let name = spec.name;
            columns.push(format!("{flag}_value AS {{labeler_id}}_{name}_measurement"));
            columns.push(format!(
                "{flag}_datetime AS {{labeler_id}}_{name}_measurement_datetime"
            ));
            columns.push(format!(
                "IF({flag}_datetime IS NULL, 0, 1) AS {{labeler_id}}_{name}_label"
            ));
            joins.push(format!("LEFT JOIN first_{flag} USING ({KEYS})"));
        }

        if self.criteria.range_rule.is_some() {
            columns.push(format!("{RANGE_FLAG}_value AS {{labeler_id}}_abnormal_measurement"));
            columns.push(format!(
                "{RANGE_FLAG}_datetime AS {{labeler_id}}_abnormal_measurement_datetime"
            ));
            columns.push(format!(
                "IF({RANGE_FLAG}_datetime IS NULL, 0, 1) AS {{labeler_id}}_abnormal_range_label"
            ));
            columns.push("range_low AS {labeler_id}_range_low".to_string());
            columns.push("range_high AS {labeler_id}_range_high".to_string());
            joins.push(format!("LEFT JOIN first_{RANGE_FLAG} USING ({KEYS})"));
        }

        format!(
            "SELECT\n    {}\nFROM {{results_project}}.{{results_dataset}}.{{cohort_name}}\n{}",
            columns.join(",\n    "),
            joins.join("\n")
        )
    }

    /// Generated query with configuration placeholders
    #[must_use]
    pub fn template(&self) -> SqlTemplate {
        let mut ctes = vec![
            self.measurements_sql(),
            ALL_MEASUREMENTS.to_string(),
            self.windowed_sql(),
            format!(
                "extremum AS (\n    SELECT {KEYS}, {}(value_as_number) AS extreme_value\n    FROM windowed\n    GROUP BY {KEYS}\n)",
                self.criteria.extremum.sql_function()
            ),
            self.flagged_sql(),
        ];
        for spec in &self.criteria.tiers {
            ctes.push(first_flagged(spec.tier.description(), ""));
        }
        if self.criteria.range_rule.is_some() {
            ctes.push(first_flagged(
                RANGE_FLAG,
                ",\n        range_low,\n        range_high",
            ));
        }

        SqlTemplate::new(format!(
            "WITH {}\n{}",
            ctes.join(",\n"),
            self.final_select()
        ))
    }

    /// Per-window baselines for baseline-relative tiers; empty for labels
    /// without them
    #[must_use]
    pub fn baselines(
        &self,
        windows: &[Window],
        measurements: &[Measurement],
        patients: &FxHashMap<i64, Patient>,
    ) -> FxHashMap<Window, f64> {
        if !self.uses_baseline() {
            return FxHashMap::default();
        }
        windows
            .iter()
            .filter_map(|window| {
                let patient = patients.get(&window.person_id);
                baseline_creatinine(
                    window,
                    measurements,
                    self.criteria.units,
                    patient.and_then(|p| p.birth_datetime),
                    patient.map_or(0, |p| p.gender_concept_id),
                )
                .map(|baseline| (*window, baseline))
            })
            .collect()
    }

    /// Evaluate the label in process
    ///
    /// Neutrophil counts must already be absolute counts; percentages are
    /// not converted here.
    #[must_use]
    pub fn evaluate(
        &self,
        windows: &[Window],
        measurements: &[Measurement],
        patients: &FxHashMap<i64, Patient>,
    ) -> Vec<WindowedLabel> {
        let baselines = self.baselines(windows, measurements, patients);
        evaluate_windows(&self.criteria, windows, measurements, &baselines)
    }
}

const fn tiers(mild: Threshold, moderate: Threshold, severe: Threshold) -> [TierSpec; 3] {
    [
        TierSpec::value(SeverityTier::Mild, mild),
        TierSpec::value(SeverityTier::Moderate, moderate),
        TierSpec::value(SeverityTier::Severe, severe),
    ]
}

pub static HYPERKALEMIA_LAB: LabDefinition = LabDefinition {
    id: "hyperkalemia_lab",
    description: "lab-based definition for hyperkalemia using blood potassium concentration (mmol/L). Thresholds: mild(>5.5),moderate(>6),severe(>7), and abnormal range.",
    analyte: "potassium",
    concept_ids: &[40_653_595, 37_074_594, 40_653_596],
    source: LabSource::Standard,
    criteria: LabCriteria {
        units: &[
            UnitConversion::identity(8753),
            UnitConversion::identity(9557),
            UnitConversion::divide_by(8840, 18.0),
        ],
        extremum: Extremum::Max,
        tiers: tiers(
            Threshold::Above(5.5),
            Threshold::Above(6.0),
            Threshold::Above(7.0),
        ),
        range_rule: Some(RangeRule::AboveHigh),
    },
};

pub static HYPOGLYCEMIA_LAB: LabDefinition = LabDefinition {
    id: "hypoglycemia_lab",
    description: "lab-based definition for hypoglycemia using blood glucose concentration (mmol/L). Thresholds: mild(<=3.9), moderate(<3.5), severe(<3), and abnormal range.",
    analyte: "glucose",
    concept_ids: &[4_144_235, 1_002_597],
    source: LabSource::Standard,
    criteria: LabCriteria {
        units: &[
            UnitConversion::divide_by(8840, 18.0),
            UnitConversion::divide_by(9028, 18.0),
            UnitConversion::identity(8753),
        ],
        extremum: Extremum::Min,
        tiers: tiers(
            Threshold::AtMost(3.9),
            Threshold::Below(3.5),
            Threshold::Below(3.0),
        ),
        range_rule: Some(RangeRule::BelowLow),
    },
};

pub static NEUTROPENIA_LAB: LabDefinition = LabDefinition {
    id: "neutropenia_lab",
    description: "lab-based definition for neutropenia based on neutrophils count (thousands/uL). Thresholds: mild(<1.5), moderate(<1), severe(<0.5).",
    analyte: "neutrophils",
    concept_ids: &[37_045_722, 37_049_637],
    source: LabSource::NeutrophilsWithBands,
    criteria: LabCriteria {
        units: &[
            UnitConversion::identity(THOUSANDS_PER_UL),
            UnitConversion::identity(THOUSANDS_PER_MM3),
            UnitConversion::divide_by(CELLS_PER_UL, 1000.0),
        ],
        extremum: Extremum::Min,
        tiers: tiers(
            Threshold::Below(1.5),
            Threshold::Below(1.0),
            Threshold::Below(0.5),
        ),
        range_rule: None,
    },
};

pub static HYPONATREMIA_LAB: LabDefinition = LabDefinition {
    id: "hyponatremia_lab",
    description: "lab-based definition for hyponatremia based on blood sodium concentration (mmol/L). Thresholds: mild (<=135),moderate(<130),severe(<125), and abnormal range.",
    analyte: "sodium",
    concept_ids: &[40_653_762],
    source: LabSource::Standard,
    criteria: LabCriteria {
        units: &[UnitConversion::identity(8753), UnitConversion::identity(9557)],
        extremum: Extremum::Min,
        tiers: tiers(
            Threshold::AtMost(135.0),
            Threshold::Below(130.0),
            Threshold::Below(125.0),
        ),
        range_rule: Some(RangeRule::BelowLow),
    },
};

/// KDIGO stages over the creatinine baseline
pub static AKI_LAB: LabDefinition = LabDefinition {
    id: "aki_lab",
    description: "lab-based definition for acute kidney injury based on blood creatinine levels (umol/L) according to KDIGO (stages 1,2, and 3), and abnormal range.",
    analyte: "creatinine",
    concept_ids: &[37_029_387, 4_013_964, 2_212_294, 3_051_825],
    source: LabSource::CreatinineBaseline,
    criteria: LabCriteria {
        units: &[
            UnitConversion::identity(8749),
            UnitConversion::divide_by(8840, CREATININE_MG_PER_UMOL),
            UnitConversion::scale(8837, 0.001, CREATININE_MG_PER_UMOL),
        ],
        extremum: Extremum::Max,
        tiers: [
            TierSpec {
                tier: SeverityTier::Mild,
                name: "aki1",
                rule: TierRule::Baseline {
                    ratio: 1.5,
                    delta: Some(26.52),
                },
            },
            TierSpec {
                tier: SeverityTier::Moderate,
                name: "aki2",
                rule: TierRule::Baseline {
                    ratio: 2.0,
                    delta: None,
                },
            },
            TierSpec {
                tier: SeverityTier::Severe,
                name: "aki3",
                rule: TierRule::Baseline {
                    ratio: 3.0,
                    delta: Some(353.6),
                },
            },
        ],
        range_rule: Some(RangeRule::AboveHigh),
    },
};

pub static ANEMIA_LAB: LabDefinition = LabDefinition {
    id: "anemia_lab",
    description: "lab-based definition for anemia based on hemoglobin levels (g/L). Thresholds: mild(<120),moderate(<110),severe(<70), and reference range",
    analyte: "hgb",
    concept_ids: &[37_072_252],
    source: LabSource::Standard,
    criteria: LabCriteria {
        units: &[
            UnitConversion::scale(8713, 10.0, 1.0),
            UnitConversion::divide_by(8840, 100.0),
        ],
        extremum: Extremum::Min,
        tiers: tiers(
            Threshold::Below(120.0),
            Threshold::Below(110.0),
            Threshold::Below(70.0),
        ),
        range_rule: Some(RangeRule::BelowLow),
    },
};

pub static THROMBOCYTOPENIA_LAB: LabDefinition = LabDefinition {
    id: "thrombocytopenia_lab",
    description: "lab-based definition for thrombocytopenia based on platelet count (10^9/L). Thresholds: mild (<150), moderate(<100), severe(<50), and reference range.",
    analyte: "platelet",
    concept_ids: &[37_037_425, 40_654_106],
    source: LabSource::Standard,
    criteria: LabCriteria {
        units: &[
            UnitConversion::identity(THOUSANDS_PER_UL),
            UnitConversion::identity(THOUSANDS_PER_MM3),
        ],
        extremum: Extremum::Min,
        tiers: tiers(
            Threshold::Below(150.0),
            Threshold::Below(100.0),
            Threshold::Below(50.0),
        ),
        range_rule: Some(RangeRule::BelowLow),
    },
};

/// Lab labels in registry order
pub static LAB_DEFINITIONS: [&LabDefinition; 7] = [
    &HYPERKALEMIA_LAB,
    &HYPOGLYCEMIA_LAB,
    &NEUTROPENIA_LAB,
    &HYPONATREMIA_LAB,
    &AKI_LAB,
    &ANEMIA_LAB,
    &THROMBOCYTOPENIA_LAB,
];
