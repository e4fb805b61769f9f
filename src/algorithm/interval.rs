//! Admission interval reconstruction
//!
//! Raw visits for a patient may overlap or touch. They are collapsed into
//! maximal non-overlapping admissions with a sweep over signed endpoints:
//! every visit contributes `+1` at its start and `-1` at its end, endpoints
//! sharing a timestamp are netted first, and an admission closes whenever the
//! running count of open visits returns to zero.

use chrono::NaiveDateTime;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{LabelerError, Result};

/// A raw visit interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInterval {
    pub person_id: i64,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl RawInterval {
    #[must_use]
    pub const fn new(person_id: i64, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            person_id,
            start,
            end,
        }
    }
}

/// A maximal merged admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CanonicalAdmission {
    pub person_id: i64,
    pub admit_date: NaiveDateTime,
    pub discharge_date: NaiveDateTime,
}

impl CanonicalAdmission {
    /// Whether `interval` lies completely inside this admission
    #[must_use]
    pub fn contains(&self, interval: &RawInterval) -> bool {
        self.person_id == interval.person_id
            && self.admit_date <= interval.start
            && interval.end <= self.discharge_date
    }

    /// The admission as a raw interval, for re-running reconstruction
    #[must_use]
    pub const fn as_interval(&self) -> RawInterval {
        RawInterval::new(self.person_id, self.admit_date, self.discharge_date)
    }
}

/// Reject intervals whose end is not strictly after their start
pub fn validate_intervals(intervals: &[RawInterval]) -> Result<()> {
    match intervals.iter().find(|i| i.end <= i.start) {
        Some(bad) => Err(LabelerError::MalformedInterval {
            patient_id: bad.person_id,
            start: bad.start,
            end: bad.end,
        }),
        None => Ok(()),
    }
}

/// Collapse raw intervals into canonical admissions
///
/// The output is ordered by `(person_id, admit_date)`. Empty input yields an
/// empty output.
///
/// # Errors
/// Returns [`LabelerError::MalformedInterval`] if any interval has
/// `end <= start`.
pub fn reconstruct_admissions(intervals: &[RawInterval]) -> Result<Vec<CanonicalAdmission>> {
    validate_intervals(intervals)?;

    let endpoints = intervals
        .iter()
        .flat_map(|i| [(i.person_id, i.start, 1_i64), (i.person_id, i.end, -1_i64)])
        .sorted_unstable_by_key(|&(person_id, at, _)| (person_id, at));

    // Net the signed endpoints that share a (person, timestamp)
    let netted = endpoints
        .chunk_by(|&(person_id, at, _)| (person_id, at))
        .into_iter()
        .map(|((person_id, at), group)| (person_id, at, group.map(|(_, _, d)| d).sum::<i64>()))
        .collect_vec();

    let mut admissions = Vec::new();
    let mut current_person = None;
    let mut open = 0_i64;
    let mut admit_date = None;

    for (person_id, at, net) in netted {
        if current_person != Some(person_id) {
            current_person = Some(person_id);
            open = 0;
            admit_date = None;
        }

        if open == 0 && net != 0 {
            admit_date = Some(at);
        }
        open += net;

        if open == 0 {
            if let Some(admit) = admit_date.take() {
                admissions.push(CanonicalAdmission {
                    person_id,
                    admit_date: admit,
                    discharge_date: at,
                });
            }
        }
    }

    log::debug!(
        "Reconstructed {} admissions from {} raw intervals",
        admissions.len(),
        intervals.len()
    );
    Ok(admissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_empty_input() {
        assert!(reconstruct_admissions(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_overlapping_visits_merge() {
        // Mon 08:00 - Wed 10:00 and Wed 09:00 - Fri 12:00
        let intervals = [
            RawInterval::new(1, at(1, 8), at(3, 10)),
            RawInterval::new(1, at(3, 9), at(5, 12)),
        ];
        let admissions = reconstruct_admissions(&intervals).unwrap();
        assert_eq!(
            admissions,
            vec![CanonicalAdmission {
                person_id: 1,
                admit_date: at(1, 8),
                discharge_date: at(5, 12),
            }]
        );
    }

    #[test]
    fn test_touching_visits_merge() {
        let intervals = [
            RawInterval::new(1, at(1, 8), at(2, 8)),
            RawInterval::new(1, at(2, 8), at(3, 8)),
        ];
        let admissions = reconstruct_admissions(&intervals).unwrap();
        assert_eq!(admissions.len(), 1);
        assert_eq!(admissions[0].admit_date, at(1, 8));
        assert_eq!(admissions[0].discharge_date, at(3, 8));
    }

    #[test]
    fn test_nested_visit_absorbed() {
        let intervals = [
            RawInterval::new(7, at(1, 0), at(10, 0)),
            RawInterval::new(7, at(2, 0), at(3, 0)),
            RawInterval::new(7, at(4, 0), at(10, 0)),
        ];
        let admissions = reconstruct_admissions(&intervals).unwrap();
        assert_eq!(admissions.len(), 1);
        assert_eq!(admissions[0].discharge_date, at(10, 0));
    }

    #[test]
    fn test_patients_are_independent() {
        let intervals = [
            RawInterval::new(2, at(1, 0), at(5, 0)),
            RawInterval::new(1, at(2, 0), at(3, 0)),
        ];
        let admissions = reconstruct_admissions(&intervals).unwrap();
        assert_eq!(admissions.len(), 2);
        assert_eq!(admissions[0].person_id, 1);
        assert_eq!(admissions[1].person_id, 2);
    }

    #[test]
    fn test_malformed_interval_rejected() {
        let intervals = [RawInterval::new(3, at(2, 0), at(1, 0))];
        let err = reconstruct_admissions(&intervals).unwrap_err();
        assert!(matches!(err, LabelerError::MalformedInterval { patient_id: 3, .. }));

        let zero_length = [RawInterval::new(3, at(2, 0), at(2, 0))];
        assert!(reconstruct_admissions(&zero_length).is_err());
    }
}
