//! Placeholder substitution for SQL templates.
//!
//! Templates use `{name}` placeholders. `{{` and `}}` produce literal braces.
//! Braces that do not enclose an identifier are copied through unchanged.

use rustc_hash::FxHashMap;

use crate::error::{LabelerError, Result};

/// Named placeholder values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    values: FxHashMap<String, String>,
}

impl TemplateContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a value
    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Add or replace a value in place
    pub fn insert(&mut self, key: &str, value: impl ToString) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Layer `other` on top of this context; values in `other` win
    #[must_use]
    pub fn merged(mut self, other: &Self) -> Self {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// A SQL template with `{name}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTemplate {
    text: String,
}

impl SqlTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// The unrendered template text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Substitute every placeholder from `context`
    ///
    /// # Errors
    /// Returns [`LabelerError::Template`] for a placeholder without a value
    pub fn render(&self, context: &TemplateContext) -> Result<String> {
        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text.as_str();

        while let Some(pos) = rest.find(['{', '}']) {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") {
                out.push('{');
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                out.push('}');
                rest = &tail[2..];
            } else if tail.starts_with('{') {
                match tail[1..].find('}') {
                    Some(end) if is_placeholder(&tail[1..=end]) => {
                        let key = &tail[1..=end];
                        let value = context
                            .get(key)
                            .ok_or_else(|| LabelerError::Template(key.to_string()))?;
                        out.push_str(value);
                        rest = &tail[end + 2..];
                    }
                    _ => {
                        out.push('{');
                        rest = &tail[1..];
                    }
                }
            } else {
                out.push('}');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl From<String> for SqlTemplate {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

fn is_placeholder(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
