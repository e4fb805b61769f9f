//! Baseline creatinine for KDIGO staging
//!
//! The baseline is the lowest creatinine measured in the 90 days before the
//! window starts. Patients without such a measurement fall back to an age
//! and sex specific reference value.

use chrono::{Duration, NaiveDateTime};

use super::window::{Measurement, UnitConversion, Window};

/// mg/dL to umol/L conversion factor: `umol/L = mg/dL / CREATININE_MG_PER_UMOL`
pub const CREATININE_MG_PER_UMOL: f64 = 0.011_312_2;
/// OMOP gender concept for female patients
pub const FEMALE_CONCEPT_ID: i64 = 8532;
/// Days before the window start searched for a baseline measurement
pub const BASELINE_LOOKBACK_DAYS: i64 = 90;

/// Reference creatinine (mg/dL) by age in days: `(first_day, last_day, value)`.
/// Adults are handled separately by sex.
pub const AGE_NORMS: [(i64, i64, f64); 6] = [
    (0, 14, 0.92),
    (15, 2 * 365 - 1, 0.36),
    (2 * 365, 5 * 365 - 1, 0.43),
    (5 * 365, 12 * 365 - 1, 0.61),
    (12 * 365, 15 * 365 - 1, 0.81),
    (15 * 365, 19 * 365 - 1, 0.84),
];
pub const ADULT_AGE_DAYS: i64 = 19 * 365;
pub const ADULT_FEMALE_NORM: f64 = 1.1;
pub const ADULT_MALE_NORM: f64 = 1.2;

/// Reference creatinine in umol/L, or `None` for a negative age
#[must_use]
pub fn age_normal_creatinine(age_days: i64, gender_concept_id: i64) -> Option<f64> {
    let mg_per_dl = if age_days >= ADULT_AGE_DAYS {
        if gender_concept_id == FEMALE_CONCEPT_ID {
            ADULT_FEMALE_NORM
        } else {
            ADULT_MALE_NORM
        }
    } else {
        AGE_NORMS
            .iter()
            .find(|(first, last, _)| (*first..=*last).contains(&age_days))
            .map(|(_, _, value)| *value)?
    };
    Some(mg_per_dl / CREATININE_MG_PER_UMOL)
}

/// SQL `CASE` expression for [`age_normal_creatinine`] over an age-in-days
/// expression and a gender concept column
#[must_use]
pub fn age_norm_sql(age_days: &str, gender: &str) -> String {
    let mut arms: Vec<String> = AGE_NORMS
        .iter()
        .map(|(first, last, value)| {
            format!("WHEN {age_days} BETWEEN {first} AND {last} THEN {value} / {CREATININE_MG_PER_UMOL}")
        })
        .collect();
    arms.push(format!(
        "WHEN {age_days} >= {ADULT_AGE_DAYS} AND {gender} = {FEMALE_CONCEPT_ID} THEN {ADULT_FEMALE_NORM} / {CREATININE_MG_PER_UMOL}"
    ));
    arms.push(format!(
        "WHEN {age_days} >= {ADULT_AGE_DAYS} AND {gender} <> {FEMALE_CONCEPT_ID} THEN {ADULT_MALE_NORM} / {CREATININE_MG_PER_UMOL}"
    ));
    arms.push("ELSE NULL".to_string());
    format!("CASE\n    {}\nEND", arms.join("\n    "))
}

/// Baseline for `window`: the minimum normalized measurement in the lookback
/// period, else the age/sex reference value
#[must_use]
pub fn baseline_creatinine(
    window: &Window,
    measurements: &[Measurement],
    units: &[UnitConversion],
    birth_datetime: Option<NaiveDateTime>,
    gender_concept_id: i64,
) -> Option<f64> {
    let lookback_start = window.start - Duration::days(BASELINE_LOOKBACK_DAYS);
    let measured = measurements
        .iter()
        .filter(|m| {
            m.person_id == window.person_id
                && m.measured_at >= lookback_start
                && m.measured_at < window.start
        })
        .filter_map(|m| {
            units
                .iter()
                .find(|u| u.unit_concept_id == m.unit_concept_id)
                .map(|u| u.apply(m.value))
        })
        .reduce(f64::min);

    measured.or_else(|| {
        let birth = birth_datetime?;
        let age_days = window.start.date().signed_duration_since(birth.date()).num_days();
        age_normal_creatinine(age_days, gender_concept_id)
    })
}
