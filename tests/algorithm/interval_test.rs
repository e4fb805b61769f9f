use crate::utils::visit;
use cohort_labeler::algorithm::{CanonicalAdmission, RawInterval, reconstruct_admissions};
use cohort_labeler::error::LabelerError;
use cohort_labeler::utils::test::at;
use pretty_assertions::assert_eq;

fn admission(person_id: i64, admit: (u32, u32), discharge: (u32, u32)) -> CanonicalAdmission {
    CanonicalAdmission {
        person_id,
        admit_date: at(admit.0, admit.1),
        discharge_date: at(discharge.0, discharge.1),
    }
}

fn as_intervals(admissions: &[CanonicalAdmission]) -> Vec<RawInterval> {
    admissions.iter().map(CanonicalAdmission::as_interval).collect()
}

#[test]
fn test_disjoint_visits_are_unchanged() {
    let visits = [
        visit(1, (1, 8), (2, 12)),
        visit(1, (4, 8), (5, 12)),
        visit(2, (3, 0), (3, 6)),
    ];
    let admissions = reconstruct_admissions(&visits).unwrap();
    assert_eq!(as_intervals(&admissions), visits.to_vec());
}

#[test]
fn test_overlapping_visits_merge() {
    // Monday 08:00 to Wednesday 10:00, then Wednesday 09:00 to Friday 12:00
    let visits = [visit(1, (1, 8), (3, 10)), visit(1, (3, 9), (5, 12))];
    let admissions = reconstruct_admissions(&visits).unwrap();
    assert_eq!(admissions, vec![admission(1, (1, 8), (5, 12))]);
}

#[test]
fn test_gap_keeps_two_admissions() {
    // Monday to Tuesday, then Thursday to Friday
    let visits = [visit(1, (1, 8), (2, 8)), visit(1, (4, 8), (5, 8))];
    let admissions = reconstruct_admissions(&visits).unwrap();
    assert_eq!(
        admissions,
        vec![admission(1, (1, 8), (2, 8)), admission(1, (4, 8), (5, 8))]
    );
}

#[test]
fn test_touching_visits_merge() {
    let visits = [visit(3, (1, 8), (2, 8)), visit(3, (2, 8), (3, 8))];
    let admissions = reconstruct_admissions(&visits).unwrap();
    assert_eq!(admissions, vec![admission(3, (1, 8), (3, 8))]);
    assert!(admissions.len() < visits.len());
}

#[test]
fn test_union_covers_every_visit() {
    let visits = [
        visit(1, (10, 0), (12, 0)),
        visit(1, (1, 0), (5, 0)),
        visit(1, (2, 0), (3, 0)),
        visit(1, (4, 0), (6, 0)),
        visit(2, (1, 0), (1, 12)),
        visit(1, (12, 0), (13, 0)),
    ];
    let admissions = reconstruct_admissions(&visits).unwrap();
    assert_eq!(
        admissions,
        vec![
            admission(1, (1, 0), (6, 0)),
            admission(1, (10, 0), (13, 0)),
            admission(2, (1, 0), (1, 12)),
        ]
    );
    for v in &visits {
        let containing = admissions.iter().filter(|a| a.contains(v)).count();
        assert_eq!(containing, 1, "{v:?} should lie in exactly one admission");
    }
}

#[test]
fn test_reconstruction_is_idempotent() {
    let visits = [
        visit(1, (1, 8), (3, 10)),
        visit(1, (3, 9), (5, 12)),
        visit(1, (7, 0), (8, 0)),
        visit(2, (2, 0), (4, 0)),
        visit(2, (3, 0), (3, 12)),
    ];
    let once = reconstruct_admissions(&visits).unwrap();
    let twice = reconstruct_admissions(&as_intervals(&once)).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_output_ordered_by_patient_and_admit() {
    let visits = [
        visit(9, (5, 0), (6, 0)),
        visit(4, (7, 0), (8, 0)),
        visit(9, (1, 0), (2, 0)),
        visit(4, (1, 0), (2, 0)),
    ];
    let admissions = reconstruct_admissions(&visits).unwrap();
    let keys: Vec<_> = admissions.iter().map(|a| (a.person_id, a.admit_date)).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(admissions.len(), 4);
}

#[test]
fn test_empty_input() {
    assert!(reconstruct_admissions(&[]).unwrap().is_empty());
}

#[test]
fn test_malformed_visit_rejected() {
    let visits = [visit(1, (1, 8), (2, 8)), visit(5, (3, 8), (3, 8))];
    let err = reconstruct_admissions(&visits).unwrap_err();
    assert!(matches!(
        err,
        LabelerError::MalformedInterval { patient_id: 5, .. }
    ));
}
