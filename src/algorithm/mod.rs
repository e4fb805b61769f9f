//! In-process admission reconstruction and windowed label evaluation
//!
//! These mirror the SQL generated for the warehouse and operate on typed
//! records, for local evaluation and validation of warehouse output.

pub mod baseline;
pub mod interval;
pub mod severity;
pub mod window;

pub use baseline::{age_normal_creatinine, baseline_creatinine};
pub use interval::{CanonicalAdmission, RawInterval, reconstruct_admissions, validate_intervals};
pub use severity::{RangeRule, SeverityTier, Threshold, TierRule, TierSpec};
pub use window::{
    Extremum, LabCriteria, Measurement, RangeHit, TierHit, TierLabel, UnitConversion, Window,
    WindowedLabel, evaluate_window, evaluate_windows,
};
