//! Demographic labels: age groups, sex and race

use crate::sql::SqlTemplate;

/// Age bands in days. Every band is inclusive at both ends; ages above the
/// last band fall into `open_ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeBands {
    pub bands: &'static [(i64, i64, &'static str)],
    pub open_ended: &'static str,
}

/// Pediatric developmental stages
pub const PEDIATRIC_AGE_GROUPS: AgeBands = AgeBands {
    bands: &[
        (0, 27, "term neonatal"),
        (28, 365, "infancy"),
        (366, 2 * 365, "toddler"),
        (2 * 365 + 1, 5 * 365, "early childhood"),
        (5 * 365 + 1, 11 * 365, "middle childhood"),
        (11 * 365 + 1, 18 * 365, "early adolescence"),
        (18 * 365 + 1, 21 * 365, "late adolescence"),
    ],
    open_ended: "non-pediatric",
};

/// Age intervals in years
pub const AGE_GROUPS: AgeBands = AgeBands {
    bands: &[
        (0, 17 * 365, "[0,18)"),
        (17 * 365 + 1, 29 * 365, "[18,30)"),
        (29 * 365 + 1, 39 * 365, "[30,40)"),
        (39 * 365 + 1, 49 * 365, "[40,50)"),
        (49 * 365 + 1, 59 * 365, "[50,60)"),
        (59 * 365 + 1, 69 * 365, "[60,70)"),
        (69 * 365 + 1, 79 * 365, "[70,80)"),
        (79 * 365 + 1, 89 * 365, "[80,90)"),
    ],
    open_ended: "[90,)",
};

/// Group for ages that cannot be placed, e.g. negative or missing
pub const UNKNOWN_AGE_GROUP: &str = "unknown";

impl AgeBands {
    fn last_day(&self) -> i64 {
        self.bands.last().map_or(-1, |&(_, last, _)| last)
    }

    /// Group of an age in days
    #[must_use]
    pub fn classify(&self, age_days: Option<i64>) -> &'static str {
        let Some(age) = age_days else {
            return UNKNOWN_AGE_GROUP;
        };
        if age > self.last_day() {
            return self.open_ended;
        }
        self.bands
            .iter()
            .find(|(first, last, _)| (*first..=*last).contains(&age))
            .map_or(UNKNOWN_AGE_GROUP, |&(_, _, name)| name)
    }

    /// SQL `CASE` expression over an age-in-days column
    #[must_use]
    pub fn to_sql(&self, column: &str) -> String {
        let arms: String = self
            .bands
            .iter()
            .map(|(first, last, name)| {
                format!("\n        WHEN {column} BETWEEN {first} AND {last} THEN '{name}'")
            })
            .collect();
        format!(
            "CASE{arms}\n        WHEN {column} > {} THEN '{}'\n        ELSE '{UNKNOWN_AGE_GROUP}'\n    END",
            self.last_day(),
            self.open_ended
        )
    }
}

const AGE: &str = "SELECT
    person_id,
    {window_start},
    {window_end},
    age_days,
    {pediatric_age_group} AS pediatric_age_group,
    {age_group} AS age_group
FROM (
    SELECT
        t1.person_id,
        t1.{window_start},
        t1.{window_end},
        DATE_DIFF(CAST(t1.{window_start} AS DATE), CAST(p.birth_datetime AS DATE), DAY) AS age_days
    FROM {results_project}.{results_dataset}.{cohort_name} t1
    LEFT JOIN {source_project}.{source_dataset}.person p
        ON t1.person_id = p.person_id
)";

const PERSON_CONCEPT: &str = "SELECT
    t1.person_id,
    t1.{window_start},
    t1.{window_end},
    c.concept_name AS {label_column}
FROM {results_project}.{results_dataset}.{cohort_name} t1
LEFT JOIN {source_project}.{source_dataset}.person p
    ON t1.person_id = p.person_id
LEFT JOIN {source_project}.{source_dataset}.concept c
    ON p.{concept_column} = c.concept_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demographic {
    Age,
    Sex,
    Race,
}

impl Demographic {
    pub const ALL: [Self; 3] = [Self::Age, Self::Sex, Self::Race];

    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Sex => "sex",
            Self::Race => "race",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Age => "Age group labels according to 1)pediatric age group and 2)intervals",
            Self::Sex => "OMOP standard concepts for sex",
            Self::Race => "OMOP standard concepts for race",
        }
    }

    #[must_use]
    pub fn template(self) -> SqlTemplate {
        let text = match self {
            Self::Age => AGE
                .replace(
                    "{pediatric_age_group}",
                    &PEDIATRIC_AGE_GROUPS.to_sql("age_days"),
                )
                .replace("{age_group}", &AGE_GROUPS.to_sql("age_days")),
            Self::Sex => PERSON_CONCEPT
                .replace("{label_column}", "sex")
                .replace("{concept_column}", "gender_concept_id"),
            Self::Race => PERSON_CONCEPT
                .replace("{label_column}", "race")
                .replace("{concept_column}", "race_concept_id"),
        };
        SqlTemplate::new(text)
    }
}
