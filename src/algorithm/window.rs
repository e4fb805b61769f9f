//! Windowed label evaluation
//!
//! For each window (a patient's admission), measurements that fall inside
//! `[start, end]` are normalized to the label's canonical unit, classified
//! into severity tiers, and the first qualifying measurement per tier is
//! reported alongside the window's extreme value.

use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::interval::CanonicalAdmission;
use super::severity::{RangeRule, SeverityTier, TierSpec};

/// Conversion of a source unit into the label's canonical unit:
/// `canonical = value * multiply / divide`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub unit_concept_id: i64,
    pub multiply: f64,
    pub divide: f64,
}

impl UnitConversion {
    #[must_use]
    pub const fn identity(unit_concept_id: i64) -> Self {
        Self {
            unit_concept_id,
            multiply: 1.0,
            divide: 1.0,
        }
    }

    #[must_use]
    pub const fn divide_by(unit_concept_id: i64, divide: f64) -> Self {
        Self {
            unit_concept_id,
            multiply: 1.0,
            divide,
        }
    }

    #[must_use]
    pub const fn scale(unit_concept_id: i64, multiply: f64, divide: f64) -> Self {
        Self {
            unit_concept_id,
            multiply,
            divide,
        }
    }

    #[allow(clippy::float_cmp)]
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.multiply == 1.0 && self.divide == 1.0
    }

    #[must_use]
    pub fn apply(&self, value: f64) -> f64 {
        value * self.multiply / self.divide
    }

    /// SQL expression converting `column`
    #[allow(clippy::float_cmp)]
    #[must_use]
    pub fn to_sql(&self, column: &str) -> String {
        match (self.multiply == 1.0, self.divide == 1.0) {
            (true, true) => column.to_string(),
            (true, false) => format!("{column} / {}", self.divide),
            (false, true) => format!("{column} * {}", self.multiply),
            (false, false) => format!("{column} * {} / {}", self.multiply, self.divide),
        }
    }
}

/// Whether the window summary keeps the smallest or largest value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

impl Extremum {
    #[must_use]
    pub const fn sql_function(self) -> &'static str {
        match self {
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }

    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    fn pick(self, current: Option<f64>, value: f64) -> Option<f64> {
        Some(match (self, current) {
            (_, None) => value,
            (Self::Min, Some(c)) => c.min(value),
            (Self::Max, Some(c)) => c.max(value),
        })
    }
}

/// Numeric definition of a lab label
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabCriteria {
    /// Accepted source units; anything else is excluded
    pub units: &'static [UnitConversion],
    pub extremum: Extremum,
    /// Tiers ordered mild, moderate, severe
    pub tiers: [TierSpec; 3],
    pub range_rule: Option<RangeRule>,
}

impl LabCriteria {
    fn conversion(&self, unit_concept_id: i64) -> Option<&UnitConversion> {
        self.units
            .iter()
            .find(|u| u.unit_concept_id == unit_concept_id)
    }
}

/// A lab measurement in its source unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub person_id: i64,
    pub measured_at: NaiveDateTime,
    pub value: f64,
    pub unit_concept_id: i64,
    pub range_low: Option<f64>,
    pub range_high: Option<f64>,
}

/// A measurement converted to the canonical unit
#[derive(Debug, Clone, Copy, PartialEq)]
struct NormalizedMeasurement {
    measured_at: NaiveDateTime,
    value: f64,
    range_low: Option<f64>,
    range_high: Option<f64>,
}

/// Convert a measurement to the canonical unit, or `None` for an unknown unit
fn normalize(criteria: &LabCriteria, m: &Measurement) -> Option<NormalizedMeasurement> {
    let conversion = criteria.conversion(m.unit_concept_id)?;
    Some(NormalizedMeasurement {
        measured_at: m.measured_at,
        value: conversion.apply(m.value),
        range_low: m.range_low.map(|v| conversion.apply(v)),
        range_high: m.range_high.map(|v| conversion.apply(v)),
    })
}

/// An evaluation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub person_id: i64,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Window {
    /// Inclusive at both ends
    #[must_use]
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at <= self.end
    }
}

impl From<CanonicalAdmission> for Window {
    fn from(admission: CanonicalAdmission) -> Self {
        Self {
            person_id: admission.person_id,
            start: admission.admit_date,
            end: admission.discharge_date,
        }
    }
}

/// First qualifying measurement of a tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierHit {
    pub value: f64,
    pub measured_at: NaiveDateTime,
}

/// First measurement outside its reference range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeHit {
    pub value: f64,
    pub measured_at: NaiveDateTime,
    pub range_low: Option<f64>,
    pub range_high: Option<f64>,
}

/// Label outcome for one window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedLabel {
    pub window: Window,
    /// Extreme normalized value inside the window
    pub extremum: Option<f64>,
    /// First hit per tier, indexed by [`SeverityTier::index`]
    pub tiers: [Option<TierHit>; 3],
    pub abnormal_range: Option<RangeHit>,
}

impl WindowedLabel {
    #[must_use]
    pub fn tier(&self, tier: SeverityTier) -> Option<&TierHit> {
        self.tiers[tier.index()].as_ref()
    }

    /// Whether any measurement qualified for `tier`
    #[must_use]
    pub fn flag(&self, tier: SeverityTier) -> bool {
        self.tier(tier).is_some()
    }

    /// One record per tier that has a qualifying measurement
    #[must_use]
    pub fn tier_rows(&self) -> Vec<TierLabel> {
        SeverityTier::ALL
            .iter()
            .filter_map(|&tier| {
                self.tier(tier).map(|hit| TierLabel {
                    person_id: self.window.person_id,
                    window_start: self.window.start,
                    window_end: self.window.end,
                    severity_tier: tier,
                    first_value: hit.value,
                    first_measured_at: hit.measured_at,
                })
            })
            .collect()
    }
}

/// Flattened per-tier label record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierLabel {
    pub person_id: i64,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub severity_tier: SeverityTier,
    pub first_value: f64,
    pub first_measured_at: NaiveDateTime,
}

/// Keep `candidate` only if it is strictly earlier than the current hit, so
/// that exact timestamp ties keep the measurement seen first
fn earliest<T: Copy>(current: Option<T>, candidate: T, at: impl Fn(&T) -> NaiveDateTime) -> Option<T> {
    match current {
        Some(c) if at(&c) <= at(&candidate) => Some(c),
        _ => Some(candidate),
    }
}

/// Evaluate one window against measurements of any patient
///
/// `baseline` is only consulted by baseline tier rules.
#[must_use]
pub fn evaluate_window(
    criteria: &LabCriteria,
    window: &Window,
    measurements: &[Measurement],
    baseline: Option<f64>,
) -> WindowedLabel {
    let in_window: SmallVec<[NormalizedMeasurement; 16]> = measurements
        .iter()
        .filter(|m| m.person_id == window.person_id && window.contains(m.measured_at))
        .filter_map(|m| normalize(criteria, m))
        .collect();

    let mut label = WindowedLabel {
        window: *window,
        extremum: None,
        tiers: [None; 3],
        abnormal_range: None,
    };

    for m in &in_window {
        label.extremum = criteria.extremum.pick(label.extremum, m.value);

        for spec in &criteria.tiers {
            if spec.rule.matches(m.value, baseline) {
                let slot = &mut label.tiers[spec.tier.index()];
                *slot = earliest(
                    *slot,
                    TierHit {
                        value: m.value,
                        measured_at: m.measured_at,
                    },
                    |h| h.measured_at,
                );
            }
        }

        if let Some(rule) = criteria.range_rule {
            if rule.matches(m.value, m.range_low, m.range_high) {
                label.abnormal_range = earliest(
                    label.abnormal_range,
                    RangeHit {
                        value: m.value,
                        measured_at: m.measured_at,
                        range_low: m.range_low,
                        range_high: m.range_high,
                    },
                    |h| h.measured_at,
                );
            }
        }
    }

    label
}

/// Evaluate many windows, grouping measurements by patient first
#[must_use]
pub fn evaluate_windows(
    criteria: &LabCriteria,
    windows: &[Window],
    measurements: &[Measurement],
    baselines: &FxHashMap<Window, f64>,
) -> Vec<WindowedLabel> {
    let mut by_person: FxHashMap<i64, Vec<Measurement>> = FxHashMap::default();
    for m in measurements {
        by_person.entry(m.person_id).or_default().push(*m);
    }

    windows
        .iter()
        .map(|window| {
            let patient = by_person
                .get(&window.person_id)
                .map_or(&[][..], Vec::as_slice);
            evaluate_window(criteria, window, patient, baselines.get(window).copied())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::severity::Threshold;
    use chrono::NaiveDate;

    const UNITS: &[UnitConversion] = &[
        UnitConversion::identity(8848),
        UnitConversion::divide_by(8784, 1000.0),
    ];

    fn criteria() -> LabCriteria {
        LabCriteria {
            units: UNITS,
            extremum: Extremum::Min,
            tiers: [
                TierSpec::value(SeverityTier::Mild, Threshold::Below(1.5)),
                TierSpec::value(SeverityTier::Moderate, Threshold::Below(1.0)),
                TierSpec::value(SeverityTier::Severe, Threshold::Below(0.5)),
            ],
            range_rule: Some(RangeRule::BelowLow),
        }
    }

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn m(hour: u32, value: f64, unit: i64) -> Measurement {
        Measurement {
            person_id: 1,
            measured_at: at(hour),
            value,
            unit_concept_id: unit,
            range_low: None,
            range_high: None,
        }
    }

    fn window() -> Window {
        Window {
            person_id: 1,
            start: at(2),
            end: at(20),
        }
    }

    #[test]
    fn test_unit_conversion_sql() {
        assert_eq!(UnitConversion::identity(1).to_sql("v"), "v");
        assert_eq!(UnitConversion::divide_by(1, 18.0).to_sql("v"), "v / 18");
        assert_eq!(
            UnitConversion::scale(1, 0.001, 0.0113122).to_sql("v"),
            "v * 0.001 / 0.0113122"
        );
    }

    #[test]
    fn test_cells_per_microliter_normalized() {
        let label = evaluate_window(&criteria(), &window(), &[m(3, 400.0, 8784)], None);
        assert_eq!(label.extremum, Some(0.4));
        assert!(label.flag(SeverityTier::Severe));
    }

    #[test]
    fn test_unknown_unit_excluded() {
        let label = evaluate_window(&criteria(), &window(), &[m(3, 0.1, 8554)], None);
        assert_eq!(label.extremum, None);
        assert!(!label.flag(SeverityTier::Mild));
    }

    #[test]
    fn test_tiers_pick_first_independently() {
        let measurements = [m(4, 1.2, 8848), m(6, 0.8, 8848), m(8, 0.3, 8848)];
        let label = evaluate_window(&criteria(), &window(), &measurements, None);
        assert_eq!(label.tier(SeverityTier::Mild).unwrap().measured_at, at(4));
        assert_eq!(label.tier(SeverityTier::Moderate).unwrap().measured_at, at(6));
        assert_eq!(label.tier(SeverityTier::Severe).unwrap().measured_at, at(8));
        assert_eq!(label.extremum, Some(0.3));
        assert_eq!(label.tier_rows().len(), 3);
    }

    #[test]
    fn test_timestamp_tie_keeps_input_order() {
        let measurements = [m(5, 1.1, 8848), m(5, 1.3, 8848)];
        let label = evaluate_window(&criteria(), &window(), &measurements, None);
        assert_eq!(label.tier(SeverityTier::Mild).unwrap().value, 1.1);
    }

    #[test]
    fn test_abnormal_range_reports_bounds() {
        let mut low = m(9, 2.0, 8848);
        low.range_low = Some(2.5);
        low.range_high = Some(7.0);
        let label = evaluate_window(&criteria(), &window(), &[low], None);
        let hit = label.abnormal_range.unwrap();
        assert_eq!(hit.range_low, Some(2.5));
        assert_eq!(hit.range_high, Some(7.0));
        assert!(!label.flag(SeverityTier::Mild));
    }

    #[test]
    fn test_evaluate_windows_groups_by_patient() {
        let mut other = m(4, 0.2, 8848);
        other.person_id = 2;
        let labels = evaluate_windows(
            &criteria(),
            &[window()],
            &[other, m(4, 1.4, 8848)],
            &FxHashMap::default(),
        );
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].extremum, Some(1.4));
        assert!(!labels[0].flag(SeverityTier::Moderate));
    }
}
