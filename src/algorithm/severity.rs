//! Severity tiers and threshold predicates for lab-based labels
//!
//! A lab label defines three nested tiers. Each tier is a predicate over the
//! normalized measurement value (and, for creatinine, over the patient's
//! baseline value). The predicates render both as Rust checks and as SQL.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity tiers, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SeverityTier {
    Mild = 1,
    Moderate = 2,
    Severe = 3,
}

impl SeverityTier {
    pub const ALL: [Self; 3] = [Self::Mild, Self::Moderate, Self::Severe];

    /// Position of the tier within a label's tier array
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Mild => "mild",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
        }
    }
}

impl fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Comparison of a value against a fixed threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    Above(f64),
    AtLeast(f64),
    Below(f64),
    AtMost(f64),
}

impl Threshold {
    #[must_use]
    pub fn matches(self, value: f64) -> bool {
        match self {
            Self::Above(t) => value > t,
            Self::AtLeast(t) => value >= t,
            Self::Below(t) => value < t,
            Self::AtMost(t) => value <= t,
        }
    }

    /// SQL comparison of `expr` against the threshold
    #[must_use]
    pub fn to_sql(self, expr: &str) -> String {
        match self {
            Self::Above(t) => format!("{expr} > {t}"),
            Self::AtLeast(t) => format!("{expr} >= {t}"),
            Self::Below(t) => format!("{expr} < {t}"),
            Self::AtMost(t) => format!("{expr} <= {t}"),
        }
    }
}

/// Predicate deciding whether a measurement qualifies for a tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TierRule {
    /// Compare the value against a fixed threshold
    Value(Threshold),
    /// Compare the value against the patient's baseline: qualifies when
    /// `value / baseline >= ratio`, or `value - baseline >= delta` if set
    Baseline { ratio: f64, delta: Option<f64> },
}

impl TierRule {
    /// Evaluate against a value and an optional baseline. A baseline rule
    /// without a baseline never qualifies, and a zero baseline only
    /// qualifies through the delta.
    #[allow(clippy::float_cmp)]
    #[must_use]
    pub fn matches(self, value: f64, baseline: Option<f64>) -> bool {
        match self {
            Self::Value(threshold) => threshold.matches(value),
            Self::Baseline { ratio, delta } => baseline.is_some_and(|b| {
                (b != 0.0 && value / b >= ratio) || delta.is_some_and(|d| value - b >= d)
            }),
        }
    }

    /// SQL predicate over the value and baseline expressions
    #[must_use]
    pub fn to_sql(self, value: &str, baseline: &str) -> String {
        match self {
            Self::Value(threshold) => threshold.to_sql(value),
            Self::Baseline { ratio, delta: None } => {
                format!("SAFE_DIVIDE({value}, {baseline}) >= {ratio}")
            }
            Self::Baseline {
                ratio,
                delta: Some(delta),
            } => format!(
                "(SAFE_DIVIDE({value}, {baseline}) >= {ratio} OR {value} - {baseline} >= {delta})"
            ),
        }
    }
}

/// A named tier with its predicate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierSpec {
    pub tier: SeverityTier,
    /// Column prefix for this tier, e.g. `mild` or `aki1`
    pub name: &'static str,
    pub rule: TierRule,
}

impl TierSpec {
    #[must_use]
    pub const fn value(tier: SeverityTier, threshold: Threshold) -> Self {
        Self {
            tier,
            name: tier.description(),
            rule: TierRule::Value(threshold),
        }
    }
}

/// Comparison against the measurement's own reference range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRule {
    AboveHigh,
    BelowLow,
}

impl RangeRule {
    /// A missing bound never flags the measurement
    #[must_use]
    pub fn matches(self, value: f64, range_low: Option<f64>, range_high: Option<f64>) -> bool {
        match self {
            Self::AboveHigh => range_high.is_some_and(|high| value > high),
            Self::BelowLow => range_low.is_some_and(|low| value < low),
        }
    }

    #[must_use]
    pub fn to_sql(self, value: &str) -> String {
        match self {
            Self::AboveHigh => format!("{value} > range_high"),
            Self::BelowLow => format!("{value} < range_low"),
        }
    }
}
