//! Query, search mode and scope types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::ids::RepoId;

/// How the query text is interpreted by the nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Literal text; translated before transmission
    Exact,
    /// Regular expression; passed through verbatim
    Regex,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Exact => "exact",
            SearchMode::Regex => "regex",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(SearchMode::Exact),
            "regex" => Ok(SearchMode::Regex),
            other => Err(FleetError::InvalidInput(format!(
                "unknown search mode '{}', expected 'exact' or 'regex'",
                other
            ))),
        }
    }
}

/// A logical search request before translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub mode: SearchMode,
    /// Overrides the configured `TotalMaxMatchCount`
    pub max_matches: Option<u32>,
    /// Overrides the configured `NumContextLines`
    pub context_lines: Option<u32>,
}

impl Query {
    pub fn new(text: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            text: text.into(),
            mode,
            max_matches: None,
            context_lines: None,
        }
    }

    pub fn exact(text: impl Into<String>) -> Self {
        Self::new(text, SearchMode::Exact)
    }

    pub fn regex(text: impl Into<String>) -> Self {
        Self::new(text, SearchMode::Regex)
    }

    pub fn with_max_matches(mut self, max_matches: u32) -> Self {
        self.max_matches = Some(max_matches);
        self
    }

    pub fn with_context_lines(mut self, context_lines: u32) -> Self {
        self.context_lines = Some(context_lines);
        self
    }
}

/// The set of repositories a search may touch.
///
/// `Unrestricted` exists so callers can express "everything", which the
/// router always refuses: global search is not a supported operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Repos(Vec<RepoId>),
    Unrestricted,
}

impl Scope {
    pub fn repos(repos: impl IntoIterator<Item = RepoId>) -> Self {
        Scope::Repos(repos.into_iter().collect())
    }

    /// Repository ids of a searchable scope.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty or unrestricted scope.
    pub fn repo_ids(&self) -> Result<&[RepoId], FleetError> {
        match self {
            Scope::Unrestricted => Err(FleetError::InvalidInput(
                "unrestricted search scope is not supported".to_string(),
            )),
            Scope::Repos(repos) if repos.is_empty() => Err(FleetError::InvalidInput(
                "search scope must name at least one repository".to_string(),
            )),
            Scope::Repos(repos) => Ok(repos),
        }
    }
}

impl From<&[RepoId]> for Scope {
    fn from(repos: &[RepoId]) -> Self {
        Scope::Repos(repos.to_vec())
    }
}
