//! Translation of logical queries into the node query string.

use fleet_types::{FleetError, Query, SearchMode};

/// Turns a [`Query`] into the `Q` string sent to nodes.
pub trait QueryTranslator: Send + Sync {
    fn translate(&self, query: &Query) -> Result<String, FleetError>;
}

/// Literal text for `exact`, verbatim pattern for `regex`.
///
/// Nodes read bare query text as a regular expression and split it on
/// whitespace, so exact text is escaped and quoted into a single term.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQueryTranslator;

impl QueryTranslator for DefaultQueryTranslator {
    fn translate(&self, query: &Query) -> Result<String, FleetError> {
        if query.text.trim().is_empty() {
            return Err(FleetError::InvalidInput(
                "query text must not be empty".to_string(),
            ));
        }

        match query.mode {
            SearchMode::Exact => {
                let escaped = regex::escape(&query.text).replace('"', "\\\"");
                Ok(format!("\"{}\"", escaped))
            }
            SearchMode::Regex => {
                regex::Regex::new(&query.text).map_err(|e| {
                    FleetError::InvalidInput(format!("invalid regular expression: {}", e))
                })?;
                Ok(query.text.clone())
            }
        }
    }
}
