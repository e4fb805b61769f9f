//! SQL text generation helpers

pub mod flowsheets;
pub mod template;

pub use flowsheets::{FLOWSHEET_CONCEPT_ID, FlowsheetExtraction};
pub use template::{SqlTemplate, TemplateContext};

/// Render a list of ids as a comma separated SQL list
#[must_use]
pub fn id_list(ids: &[i64]) -> String {
    itertools::join(ids, ", ")
}
