use crate::utils::{measurement, window};
use cohort_labeler::algorithm::{Measurement, SeverityTier, WindowedLabel, evaluate_window};
use cohort_labeler::labeler::lab::{
    CELLS_PER_UL, HYPONATREMIA_LAB, NEUTROPENIA_LAB, THOUSANDS_PER_UL,
};
use cohort_labeler::utils::test::at;
use rustc_hash::FxHashMap;

fn neutrophils(measurements: &[Measurement]) -> WindowedLabel {
    evaluate_window(
        &NEUTROPENIA_LAB.criteria,
        &window(1, (10, 0), (14, 0)),
        measurements,
        None,
    )
}

#[test]
fn test_first_severe_value_sets_every_tier() {
    let label = neutrophils(&[
        measurement(1, (11, 0), 0.4, THOUSANDS_PER_UL),
        measurement(1, (12, 0), 1.2, THOUSANDS_PER_UL),
    ]);
    for tier in SeverityTier::ALL {
        let hit = label.tier(tier).unwrap();
        assert_eq!(hit.value, 0.4);
        assert_eq!(hit.measured_at, at(11, 0));
        assert!(label.flag(tier));
    }
    assert_eq!(label.extremum, Some(0.4));
    assert!(label.abnormal_range.is_none());
}

#[test]
fn test_events_outside_window_ignored() {
    let label = neutrophils(&[
        measurement(1, (9, 23), 0.1, THOUSANDS_PER_UL),
        measurement(1, (10, 0), 1.4, THOUSANDS_PER_UL),
        measurement(1, (14, 1), 0.1, THOUSANDS_PER_UL),
        measurement(2, (12, 0), 0.1, THOUSANDS_PER_UL),
    ]);
    // bounds are inclusive
    assert_eq!(label.tier(SeverityTier::Mild).unwrap().measured_at, at(10, 0));
    assert!(!label.flag(SeverityTier::Moderate));
    assert!(!label.flag(SeverityTier::Severe));
    assert_eq!(label.extremum, Some(1.4));

    let end = neutrophils(&[measurement(1, (14, 0), 0.2, THOUSANDS_PER_UL)]);
    assert!(end.flag(SeverityTier::Severe));
}

#[test]
fn test_tiers_are_nested() {
    let series = [
        vec![measurement(1, (11, 0), 0.9, THOUSANDS_PER_UL)],
        vec![
            measurement(1, (10, 6), 1.4, THOUSANDS_PER_UL),
            measurement(1, (11, 0), 0.8, THOUSANDS_PER_UL),
            measurement(1, (13, 0), 0.3, THOUSANDS_PER_UL),
        ],
        vec![
            measurement(1, (12, 0), 300.0, CELLS_PER_UL),
            measurement(1, (10, 12), 1_200.0, CELLS_PER_UL),
        ],
        vec![measurement(1, (12, 0), 2.0, THOUSANDS_PER_UL)],
    ];

    for measurements in &series {
        let label = neutrophils(measurements);
        if label.flag(SeverityTier::Severe) {
            assert!(label.flag(SeverityTier::Moderate));
        }
        if label.flag(SeverityTier::Moderate) {
            assert!(label.flag(SeverityTier::Mild));
        }
        let first = |tier| label.tier(tier).map(|hit| hit.measured_at);
        if let (Some(mild), Some(moderate)) =
            (first(SeverityTier::Mild), first(SeverityTier::Moderate))
        {
            assert!(mild <= moderate);
        }
        if let (Some(moderate), Some(severe)) =
            (first(SeverityTier::Moderate), first(SeverityTier::Severe))
        {
            assert!(moderate <= severe);
        }
    }
}

#[test]
fn test_cells_per_microliter_are_converted() {
    let label = neutrophils(&[measurement(1, (12, 0), 300.0, CELLS_PER_UL)]);
    assert_eq!(label.extremum, Some(0.3));
    assert!(label.flag(SeverityTier::Severe));
}

#[test]
fn test_unknown_unit_excluded() {
    let label = neutrophils(&[measurement(1, (12, 0), 0.1, 9_999)]);
    assert_eq!(label.extremum, None);
    assert!(SeverityTier::ALL.iter().all(|&tier| !label.flag(tier)));
}

#[test]
fn test_no_events_is_absent_not_error() {
    let label = neutrophils(&[]);
    assert_eq!(label.extremum, None);
    assert_eq!(label.tiers, [None; 3]);
    assert!(label.abnormal_range.is_none());
    assert!(label.tier_rows().is_empty());
}

#[test]
fn test_timestamp_ties_keep_input_order() {
    let label = neutrophils(&[
        measurement(1, (12, 0), 0.4, THOUSANDS_PER_UL),
        measurement(1, (12, 0), 0.3, THOUSANDS_PER_UL),
    ]);
    assert_eq!(label.tier(SeverityTier::Severe).unwrap().value, 0.4);
    assert_eq!(label.extremum, Some(0.3));
}

#[test]
fn test_first_value_below_reference_range() {
    let mut low = measurement(1, (12, 0), 134.0, 8_753);
    low.range_low = Some(136.0);
    low.range_high = Some(145.0);
    let mut later = measurement(1, (13, 0), 120.0, 8_753);
    later.range_low = Some(136.0);

    let labels = HYPONATREMIA_LAB.evaluate(
        &[window(1, (10, 0), (14, 0))],
        &[later, low],
        &FxHashMap::default(),
    );
    let label = &labels[0];
    let range = label.abnormal_range.unwrap();
    assert_eq!(range.measured_at, at(12, 0));
    assert_eq!(range.range_low, Some(136.0));
    assert_eq!(range.range_high, Some(145.0));
    assert_eq!(label.tier(SeverityTier::Mild).unwrap().value, 134.0);
    assert_eq!(label.tier(SeverityTier::Severe).unwrap().measured_at, at(13, 0));
    assert_eq!(label.extremum, Some(120.0));
}
