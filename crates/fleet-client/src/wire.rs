//! JSON payloads exchanged with index nodes.
//!
//! Field names are fixed by the node API and must not change.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use fleet_types::RepoId;

pub const SEARCH_PATH: &str = "/api/search";
pub const PROXY_SEARCH_PATH: &str = "/indexer/proxy_search";
pub const INDEX_PATH: &str = "/indexer/index";
pub const TRUNCATE_PATH: &str = "/indexer/truncate";

/// Path of the per-repository delete endpoint.
pub fn delete_path(repo_id: RepoId) -> String {
    format!("{}/{}", INDEX_PATH, repo_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchOptions {
    pub total_max_match_count: u32,
    pub num_context_lines: u32,
}

/// `{"Q": .., "Opts": {..}, "RepoIds": [..]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchRequest {
    pub q: String,
    pub opts: SearchOptions,
    pub repo_ids: Vec<RepoId>,
}

/// One downstream node a proxy should query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForwardTarget {
    pub endpoint: String,
    pub repo_ids: Vec<RepoId>,
}

/// Search request plus the nodes the receiving node fans out to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProxySearchRequest {
    #[serde(flatten)]
    pub search: SearchRequest,
    pub forward_to: Vec<ForwardTarget>,
}

/// Decoded search response: either `Result` or `Error`.
///
/// Older nodes spell the error field `error`. The two spellings are kept as
/// separate fields so a body carrying both still decodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPayload {
    #[serde(rename = "Result", default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SearchResultBody>,

    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub legacy_error: Option<String>,
}

impl SearchPayload {
    /// First non-blank error, `Error` before `error`.
    pub fn error_message(&self) -> Option<&str> {
        [self.error.as_deref(), self.legacy_error.as_deref()]
            .into_iter()
            .flatten()
            .find(|message| !message.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchResultBody {
    #[serde(default)]
    pub file_count: u64,

    #[serde(default)]
    pub match_count: u64,

    /// Nodes send `null` rather than `[]` when nothing matched
    #[serde(default)]
    pub files: Option<Vec<FileMatch>>,
}

impl SearchResultBody {
    pub fn files(&self) -> &[FileMatch] {
        self.files.as_deref().unwrap_or(&[])
    }
}

/// One matching file, as ranked by the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileMatch {
    #[serde(default)]
    pub score: f64,

    #[serde(default)]
    pub file_name: String,

    #[serde(default)]
    pub repository: String,

    #[serde(default)]
    pub line_matches: Option<Vec<Value>>,

    /// Fields this client does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileMatch {
    pub fn line_matches(&self) -> &[Value] {
        self.line_matches.as_deref().unwrap_or(&[])
    }
}

/// Connection info the node uses to fetch repository content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StorageConnection {
    pub address: String,
    pub token: String,
    pub storage: String,
    pub path: String,
}

/// Callback the node invokes when indexing finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexCallback {
    pub name: String,
    pub payload: Value,
}

/// Caller's description of one repository to index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexTarget {
    pub repo_id: RepoId,
    pub connection: StorageConnection,
    pub callback: Option<IndexCallback>,
}

/// Body of an index request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexRequest {
    pub gitaly_connection_info: StorageConnection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<IndexCallback>,
    pub repo_id: RepoId,
    pub file_size_limit: u64,
    /// Go duration string, e.g. "1800s"
    pub timeout: String,
    pub force: bool,
}
