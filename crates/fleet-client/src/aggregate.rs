//! Combined view over the responses of several nodes.

use std::collections::BTreeMap;

use fleet_types::NodeId;

use crate::merge::ScoreMerge;
use crate::response::NodeResponse;

/// One [`NodeResponse`] per queried node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateResponse {
    responses: BTreeMap<NodeId, NodeResponse>,
}

impl AggregateResponse {
    pub fn new(responses: BTreeMap<NodeId, NodeResponse>) -> Self {
        Self { responses }
    }

    pub fn responses(&self) -> &BTreeMap<NodeId, NodeResponse> {
        &self.responses
    }

    pub fn get(&self, node: &NodeId) -> Option<&NodeResponse> {
        self.responses.get(node)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Every node succeeded.
    pub fn is_success(&self) -> bool {
        self.responses.values().all(NodeResponse::is_success)
    }

    /// At least one node failed.
    pub fn is_failure(&self) -> bool {
        self.responses.values().any(NodeResponse::is_failure)
    }

    /// Error messages of failed nodes, joined with ", ".
    pub fn error_message(&self) -> String {
        self.responses
            .values()
            .filter_map(NodeResponse::error_message)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn failed_nodes(&self) -> Vec<&NodeId> {
        self.responses
            .iter()
            .filter(|(_, response)| response.is_failure())
            .map(|(node, _)| node)
            .collect()
    }

    pub fn file_count(&self) -> u64 {
        self.responses.values().map(NodeResponse::file_count).sum()
    }

    pub fn match_count(&self) -> u64 {
        self.responses.values().map(NodeResponse::match_count).sum()
    }

    /// Files from all nodes in merged score order.
    ///
    /// Each call starts a fresh merge; a single merge cannot be rewound.
    pub fn files(&self) -> ScoreMerge<'_> {
        ScoreMerge::new(
            self.responses
                .iter()
                .map(|(node, response)| (node, response.file_slice())),
        )
    }
}

impl FromIterator<(NodeId, NodeResponse)> for AggregateResponse {
    fn from_iter<T: IntoIterator<Item = (NodeId, NodeResponse)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
