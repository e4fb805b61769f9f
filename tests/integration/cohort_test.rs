use crate::utils::{interval_batch, test_config, visit};
use cohort_labeler::cohort::{AdmissionCohort, AdmissionFilteredCohort};
use cohort_labeler::utils::test::{Dispatch, RecordingWarehouse};
use cohort_labeler::{
    Cohort, ConfigOverrides, ResolvedConfig, create_cohort_table, verify_admission_cohort,
};

#[test]
fn test_cohort_matches_reconstruction() {
    let visits = [
        visit(1, (1, 8), (3, 10)),
        visit(1, (3, 9), (5, 12)),
        visit(2, (1, 0), (2, 0)),
    ];
    let cohort = [visit(1, (1, 8), (5, 12)), visit(2, (1, 0), (2, 0))];
    let warehouse = RecordingWarehouse::new()
        .with_pages(vec![interval_batch(
            "visit_start_datetime",
            "visit_end_datetime",
            &visits,
        )])
        .with_pages(vec![interval_batch("admit_date", "discharge_date", &cohort)]);

    let check = verify_admission_cohort(&warehouse, &test_config()).unwrap();
    assert!(check.is_consistent());
    assert_eq!((check.visits, check.expected, check.actual), (3, 2, 2));

    let dispatched = warehouse.dispatched();
    assert_eq!(dispatched.len(), 2);
    assert!(matches!(&dispatched[0], Dispatch::Stream(sql) if sql.contains("visit_start_datetime")));
    assert!(dispatched[1].sql().ends_with("FROM som-nero-nigam-starr.temp_dataset.temp_cohort"));
}

#[test]
fn test_split_admission_is_reported() {
    let visits = [visit(1, (1, 8), (3, 10)), visit(1, (3, 9), (5, 12))];
    let cohort = [visit(1, (1, 8), (3, 10)), visit(1, (3, 9), (5, 12))];
    let warehouse = RecordingWarehouse::new()
        .with_pages(vec![interval_batch(
            "visit_start_datetime",
            "visit_end_datetime",
            &visits,
        )])
        .with_pages(vec![interval_batch("admit_date", "discharge_date", &cohort)]);

    let check = verify_admission_cohort(&warehouse, &test_config()).unwrap();
    assert!(!check.is_consistent());
    assert_eq!(check.missing.len(), 1);
    assert_eq!(check.unexpected.len(), 2);
}

#[test]
fn test_cohort_creation_uses_overrides() {
    let config = ResolvedConfig::from_overrides(
        ConfigOverrides::default()
            .with_limit(500)
            .with_min_stay_hours(24)
            .with_cohort_name("admissions_2021"),
    )
    .unwrap();
    let warehouse = RecordingWarehouse::new();
    create_cohort_table(&warehouse, &config, false).unwrap();

    let statements = warehouse.statements();
    assert_eq!(statements.len(), 1);
    let sql = &statements[0];
    assert!(sql.starts_with(
        "CREATE OR REPLACE TABLE som-nero-nigam-starr.temp_dataset.admissions_2021 AS"
    ));
    assert!(sql.contains("LIMIT 500"));
    assert!(sql.contains("DATETIME_DIFF(visit_end_datetime, visit_start_datetime, HOUR) > 24"));
    assert_eq!(sql, &AdmissionCohort.create_query(&config).unwrap());
}

#[test]
fn test_failed_cohort_stops_before_filtered_table() {
    let config = test_config();
    let warehouse = RecordingWarehouse::new().failing_on("temp_cohort AS");
    assert!(create_cohort_table(&warehouse, &config, true).is_err());
    assert_eq!(warehouse.dispatched().len(), 1);

    let filtered = AdmissionFilteredCohort.create_query(&config).unwrap();
    assert!(filtered.contains("FARM_FINGERPRINT"));
}
