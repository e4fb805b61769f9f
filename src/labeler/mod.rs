//! Label definitions and the labeler registry
//!
//! Every labeler renders one query over the cohort table that returns the
//! join keys (`person_id` and the two window fields) followed by its own label
//! columns. The [`LabelerRegistry`] maps identifiers to labelers in a fixed
//! order, which is also the column order of the final label table.

pub mod demographics;
pub mod diagnosis;
pub mod lab;
pub mod operational;
pub mod plan;

use std::fmt;

use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::error::{LabelerError, Result};
use crate::sql::SqlTemplate;

pub use demographics::Demographic;
pub use diagnosis::{DIAGNOSIS_DEFINITIONS, DiagnosisDefinition};
pub use lab::{LAB_DEFINITIONS, LabDefinition, LabSource, Patient};
pub use operational::Operational;
pub use plan::{LabelPlan, PlanStep, StepKind, create_label_table, label_plan};

/// A labeler, dispatched by family
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Labeler {
    Demographic(Demographic),
    Operational(Operational),
    Diagnosis(&'static DiagnosisDefinition),
    Lab(&'static LabDefinition),
}

impl Labeler {
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Self::Demographic(d) => d.id(),
            Self::Operational(o) => o.id(),
            Self::Diagnosis(d) => d.id,
            Self::Lab(l) => l.id,
        }
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Demographic(d) => d.description(),
            Self::Operational(o) => o.description(),
            Self::Diagnosis(d) => d.description,
            Self::Lab(l) => l.description,
        }
    }

    /// Unrendered query with configuration placeholders
    #[must_use]
    pub fn template(&self) -> SqlTemplate {
        match self {
            Self::Demographic(d) => d.template(),
            Self::Operational(o) => o.template(),
            Self::Diagnosis(d) => d.template(),
            Self::Lab(l) => l.template(),
        }
    }

    /// Query rendered against `config`
    pub fn query(&self, config: &ResolvedConfig) -> Result<String> {
        let context = config.template_context().with("labeler_id", self.id());
        self.template().render(&context)
    }
}

impl fmt::Display for Labeler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Identifier and description of a registered labeler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelerInfo {
    pub id: &'static str,
    pub description: &'static str,
}

/// Ordered set of labelers addressable by identifier
#[derive(Debug, Clone, PartialEq)]
pub struct LabelerRegistry {
    labelers: Vec<Labeler>,
}

impl Default for LabelerRegistry {
    /// Demographic, operational, lab and diagnosis labelers, in that order.
    /// `readmission_30` is defined but not registered.
    fn default() -> Self {
        let labelers = Demographic::ALL
            .iter()
            .map(|&d| Labeler::Demographic(d))
            .chain(Operational::REGISTERED.iter().map(|&o| Labeler::Operational(o)))
            .chain(LAB_DEFINITIONS.iter().map(|&l| Labeler::Lab(l)))
            .chain(DIAGNOSIS_DEFINITIONS.iter().map(|&d| Labeler::Diagnosis(d)))
            .collect();
        Self { labelers }
    }
}

impl LabelerRegistry {
    /// Registry without any labeler
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            labelers: Vec::new(),
        }
    }

    /// Register `labeler`, replacing a labeler with the same id in place
    #[must_use]
    pub fn with_labeler(mut self, labeler: Labeler) -> Self {
        match self.labelers.iter_mut().find(|l| l.id() == labeler.id()) {
            Some(existing) => *existing = labeler,
            None => self.labelers.push(labeler),
        }
        self
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Labeler> {
        self.labelers.iter().find(|l| l.id() == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labelers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labelers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Labeler> {
        self.labelers.iter()
    }

    /// Identifier and description of every labeler, in registry order
    #[must_use]
    pub fn list(&self) -> Vec<LabelerInfo> {
        self.labelers
            .iter()
            .map(|l| LabelerInfo {
                id: l.id(),
                description: l.description(),
            })
            .collect()
    }

    fn ensure_known<S: AsRef<str>>(&self, ids: &[S]) -> Result<()> {
        match ids.iter().find(|id| !self.contains(id.as_ref())) {
            Some(unknown) => Err(LabelerError::UnknownLabeler(unknown.as_ref().to_string())),
            None => Ok(()),
        }
    }

    /// Labelers to run: `include` in the given order (every labeler when
    /// `None`), minus `exclude`. Duplicates are dropped.
    ///
    /// # Errors
    /// Returns [`LabelerError::UnknownLabeler`] for any id, included or
    /// excluded, that is not registered.
    pub fn select<S: AsRef<str>>(&self, include: Option<&[S]>, exclude: &[S]) -> Result<Vec<Labeler>> {
        if let Some(include) = include {
            self.ensure_known(include)?;
        }
        self.ensure_known(exclude)?;

        let candidates: Vec<Labeler> = match include {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.get(id.as_ref()).copied())
                .collect(),
            None => self.labelers.clone(),
        };

        let mut selected: Vec<Labeler> = Vec::with_capacity(candidates.len());
        for labeler in candidates {
            let excluded = exclude.iter().any(|id| id.as_ref() == labeler.id());
            if !excluded && !selected.iter().any(|s| s.id() == labeler.id()) {
                selected.push(labeler);
            }
        }
        Ok(selected)
    }
}

/// Identifier and description of every default labeler
#[must_use]
pub fn list_labelers() -> Vec<LabelerInfo> {
    LabelerRegistry::default().list()
}
