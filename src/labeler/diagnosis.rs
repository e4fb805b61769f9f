//! Diagnosis-based labels
//!
//! A diagnosis label is positive when the patient has at least one condition
//! occurrence inside the window whose concept is one of the listed condition
//! concepts or any valid descendant of them.

use crate::sql::{SqlTemplate, id_list};

const DIAGNOSIS: &str = "WITH concepts AS (
    SELECT concept_id
    FROM {source_project}.{source_dataset}.concept
    WHERE concept_id IN ({condition_concept_ids})

    UNION DISTINCT

    SELECT c.concept_id
    FROM {source_project}.{source_dataset}.concept c
    INNER JOIN {source_project}.{source_dataset}.concept_ancestor ca
        ON c.concept_id = ca.descendant_concept_id
        AND ca.ancestor_concept_id IN ({condition_concept_ids})
        AND c.invalid_reason IS NULL
),
first_occurrence AS (
    SELECT
        t1.person_id,
        t1.{window_start},
        t1.{window_end},
        co.condition_start_datetime
    FROM {results_project}.{results_dataset}.{cohort_name} t1
    INNER JOIN {source_project}.{source_dataset}.condition_occurrence co
        ON t1.person_id = co.person_id
        AND co.condition_start_datetime BETWEEN t1.{window_start} AND t1.{window_end}
    INNER JOIN concepts c
        ON co.condition_concept_id = c.concept_id
    WHERE TRUE
    QUALIFY ROW_NUMBER() OVER (
        PARTITION BY t1.person_id, t1.{window_start}, t1.{window_end}
        ORDER BY co.condition_start_datetime
    ) = 1
)
SELECT
    person_id,
    {window_start},
    {window_end},
    IF(condition_start_datetime IS NULL, 0, 1) AS {labeler_id}_label,
    condition_start_datetime AS {labeler_id}_start_datetime
FROM {results_project}.{results_dataset}.{cohort_name}
LEFT JOIN first_occurrence USING (person_id, {window_start}, {window_end})";

/// Condition concepts defining a diagnosis label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosisDefinition {
    pub id: &'static str,
    pub description: &'static str,
    /// Ancestor condition concepts; descendants are included
    pub condition_concept_ids: &'static [i64],
}

impl DiagnosisDefinition {
    #[must_use]
    pub fn template(&self) -> SqlTemplate {
        SqlTemplate::new(DIAGNOSIS.replace(
            "{condition_concept_ids}",
            &id_list(self.condition_concept_ids),
        ))
    }
}

pub static HYPOGLYCEMIA_DX: DiagnosisDefinition = DiagnosisDefinition {
    id: "hypoglycemia_dx",
    description: "hypoglycemia defined as at least one condition occurrence of \"hypoglycemia\"",
    condition_concept_ids: &[
        380_688, 4_226_798, 36_714_116, 24_609, 4_029_423, 45_757_363, 4_096_804, 4_048_805,
        4_228_112, 23_034, 4_029_424, 45_769_876,
    ],
};

pub static AKI_DX: DiagnosisDefinition = DiagnosisDefinition {
    id: "aki_dx",
    description: "AKI defined as having at least one condition occurrence of \"acute renal failure\"",
    condition_concept_ids: &[197_320, 432_961, 444_044],
};

pub static ANEMIA_DX: DiagnosisDefinition = DiagnosisDefinition {
    id: "anemia_dx",
    description: "anemia defined as having at least one condition occurrence of \"anemia\"",
    condition_concept_ids: &[
        439_777, 37_018_722, 37_017_132, 35_624_756, 4_006_467, 37_398_911, 37_395_652,
    ],
};

pub static HYPERKALEMIA_DX: DiagnosisDefinition = DiagnosisDefinition {
    id: "hyperkalemia_dx",
    description: "hyperkalemia defined as having at least one condition occurrence of \"hyperkalemia\"",
    condition_concept_ids: &[434_610],
};

pub static HYPONATREMIA_DX: DiagnosisDefinition = DiagnosisDefinition {
    id: "hyponatremia_dx",
    description: "hyponatremia defined as having at least one condition occurrence of \"hyponatremia\"",
    condition_concept_ids: &[435_515, 4_232_311],
};

pub static THROMBOCYTOPENIA_DX: DiagnosisDefinition = DiagnosisDefinition {
    id: "thrombocytopenia_dx",
    description: "thrombocytopenia defined as having at least one condition occurrence of \"thrombocytopenia\"",
    condition_concept_ids: &[432_870],
};

pub static NEUTROPENIA_DX: DiagnosisDefinition = DiagnosisDefinition {
    id: "neutropenia_dx",
    description: "neutropenia defined as having at least one condition occurrence of \"neutropenia\"",
    condition_concept_ids: &[301_794, 320_073],
};

/// Diagnosis labels in registry order
pub static DIAGNOSIS_DEFINITIONS: [&DiagnosisDefinition; 7] = [
    &HYPOGLYCEMIA_DX,
    &AKI_DX,
    &ANEMIA_DX,
    &HYPERKALEMIA_DX,
    &HYPONATREMIA_DX,
    &THROMBOCYTOPENIA_DX,
    &NEUTROPENIA_DX,
];
