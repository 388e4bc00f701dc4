//! Node and repository identifiers, endpoints and fan-out targets.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Repository (project) identifier as understood by the index nodes.
pub type RepoId = u64;

/// Opaque key naming one index node.
///
/// The router never interprets the value; it is only passed to the
/// node resolver and used as a map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Base URLs of one node.
///
/// Search and index traffic may be served by different listeners, so the
/// two are resolved separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoints {
    /// Base URL for search and proxy search requests
    pub search_url: String,

    /// Base URL for index, delete and truncate requests
    pub index_url: String,
}

impl NodeEndpoints {
    pub fn new(search_url: impl Into<String>, index_url: impl Into<String>) -> Self {
        Self {
            search_url: trim_base(search_url.into()),
            index_url: trim_base(index_url.into()),
        }
    }

    /// Both kinds of traffic on one base URL.
    pub fn single(base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        Self::new(base.clone(), base)
    }

    /// Join a path onto the search base URL.
    pub fn search_path(&self, path: &str) -> String {
        join_url(&self.search_url, path)
    }

    /// Join a path onto the index base URL.
    pub fn index_path(&self, path: &str) -> String {
        join_url(&self.index_url, path)
    }
}

fn trim_base(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Mapping from node to the repositories that node should search.
///
/// Keys are unique and iterate in a stable order, which is what makes
/// merged results deterministic regardless of which node answers first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetMap(BTreeMap<NodeId, Vec<RepoId>>);

impl TargetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add repositories for a node, merging with any already present.
    pub fn insert(&mut self, node: NodeId, repos: impl IntoIterator<Item = RepoId>) {
        let entry = self.0.entry(node).or_default();
        for repo in repos {
            if !entry.contains(&repo) {
                entry.push(repo);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, node: &NodeId) -> Option<&[RepoId]> {
        self.0.get(node).map(Vec::as_slice)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &[RepoId])> {
        self.0.iter().map(|(node, repos)| (node, repos.as_slice()))
    }

    /// Total number of repositories across all nodes.
    pub fn repo_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

impl<N: Into<NodeId>, R: IntoIterator<Item = RepoId>> FromIterator<(N, R)> for TargetMap {
    fn from_iter<T: IntoIterator<Item = (N, R)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (node, repos) in iter {
            map.insert(node.into(), repos);
        }
        map
    }
}
