use crate::utils::test_config;
use cohort_labeler::error::LabelerError;
use cohort_labeler::labeler::plan::SUFFIX_LEN;
use cohort_labeler::labeler::{Labeler, Operational, StepKind};
use cohort_labeler::utils::test::{Dispatch, RecordingWarehouse};
use cohort_labeler::{LabelerRegistry, create_label_table, label_plan, list_labelers};
use pretty_assertions::assert_eq;

#[test]
fn test_unknown_labeler_fails_before_dispatch() {
    let warehouse = RecordingWarehouse::new();
    let err = create_label_table(
        &warehouse,
        &LabelerRegistry::default(),
        &test_config(),
        Some(&["age", "sepsis_lab"][..]),
        &[],
    )
    .unwrap_err();
    assert!(matches!(err, LabelerError::UnknownLabeler(ref id) if id == "sepsis_lab"));
    assert_eq!(err.to_string(), "Provided labeler_id sepsis_lab not defined");
    assert!(warehouse.dispatched().is_empty());
}

#[test]
fn test_unknown_exclusion_rejected() {
    let err = label_plan(
        &LabelerRegistry::default(),
        &test_config(),
        None,
        &["age", "height"],
    )
    .unwrap_err();
    assert!(matches!(err, LabelerError::UnknownLabeler(_)));
}

#[test]
fn test_steps_share_one_suffix() {
    let plan = label_plan(
        &LabelerRegistry::default(),
        &test_config(),
        Some(&["mortality", "aki_lab"][..]),
        &[],
    )
    .unwrap();

    let suffix = plan.suffix();
    assert_eq!(suffix.len(), SUFFIX_LEN);
    assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));

    let kinds: Vec<StepKind> = plan.steps().iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StepKind::CreateTemp,
            StepKind::CreateTemp,
            StepKind::CreateTarget,
            StepKind::DropTemp,
            StepKind::DropTemp,
        ]
    );

    let created: Vec<&str> = plan
        .steps()
        .iter()
        .filter(|s| s.kind == StepKind::CreateTemp)
        .map(|s| s.table.as_str())
        .collect();
    let dropped: Vec<&str> = plan
        .steps()
        .iter()
        .filter(|s| s.kind == StepKind::DropTemp)
        .map(|s| s.table.as_str())
        .collect();
    assert_eq!(created, dropped);
    assert_eq!(
        created,
        vec![
            format!("som-nero-nigam-starr.temp.temp_mortality_{suffix}"),
            format!("som-nero-nigam-starr.temp.temp_aki_lab_{suffix}"),
        ]
    );

    let target = &plan.steps()[2];
    assert_eq!(target.table, "som-nero-nigam-starr.temp_dataset.temp_cohort_labeled");
    for table in &created {
        assert!(target.sql.contains(&format!("LEFT JOIN {table} USING")));
    }
}

#[test]
fn test_execution_dispatches_plan_in_order() {
    let warehouse = RecordingWarehouse::new();
    let plan = create_label_table(
        &warehouse,
        &LabelerRegistry::default(),
        &test_config(),
        Some(&["sex", "los_7", "hyponatremia_dx"][..]),
        &["los_7"],
    )
    .unwrap();

    assert_eq!(plan.labeler_ids(), ["sex", "hyponatremia_dx"]);
    let expected: Vec<Dispatch> = plan
        .steps()
        .iter()
        .map(|s| Dispatch::Execute(s.sql.clone()))
        .collect();
    assert_eq!(warehouse.dispatched(), expected);
}

#[test]
fn test_exclusion_from_full_registry() {
    let plan = label_plan(
        &LabelerRegistry::default(),
        &test_config(),
        None,
        &["age", "neutropenia_lab"],
    )
    .unwrap();
    assert_eq!(plan.labeler_ids().len(), list_labelers().len() - 2);
    assert!(!plan.labeler_ids().contains(&"age"));
    assert!(!plan.labeler_ids().contains(&"neutropenia_lab"));
}

#[test]
fn test_everything_excluded_is_rejected() {
    let warehouse = RecordingWarehouse::new();
    let err = create_label_table(
        &warehouse,
        &LabelerRegistry::default(),
        &test_config(),
        Some(&["race"][..]),
        &["race"],
    )
    .unwrap_err();
    assert!(matches!(err, LabelerError::Config(_)));
    assert!(warehouse.dispatched().is_empty());
}

#[test]
fn test_readmission_requires_opt_in() {
    let config = test_config();
    assert!(label_plan(
        &LabelerRegistry::default(),
        &config,
        Some(&["readmission_30"][..]),
        &[],
    )
    .is_err());

    let registry =
        LabelerRegistry::default().with_labeler(Labeler::Operational(Operational::Readmission30));
    let plan = label_plan(&registry, &config, Some(&["readmission_30"][..]), &[]).unwrap();
    assert!(plan.steps()[0].sql.contains("readmission_30_label"));
}

#[test]
fn test_listed_labelers_have_descriptions() {
    let labelers = list_labelers();
    assert_eq!(labelers.len(), 20);
    assert!(labelers.iter().all(|l| !l.description.is_empty()));
    assert_eq!(labelers[0].id, "age");
}
