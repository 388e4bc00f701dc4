//! Node resolution: mapping opaque node ids to base URLs.

use std::collections::BTreeMap;

use async_trait::async_trait;

use fleet_types::{FleetSettings, NodeEndpoints, NodeId};

/// Lookup of node endpoints, backed by whatever registry knows the fleet.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    /// Endpoints for `node`, or `None` if the registry has no such node.
    async fn resolve(&self, node: &NodeId) -> Option<NodeEndpoints>;

    /// Every node the registry knows about.
    async fn all_nodes(&self) -> Vec<NodeId>;
}

/// Resolver over a fixed node table, usually loaded from settings.
#[derive(Debug, Clone, Default)]
pub struct StaticNodeResolver {
    nodes: BTreeMap<NodeId, NodeEndpoints>,
}

impl StaticNodeResolver {
    pub fn new(nodes: BTreeMap<NodeId, NodeEndpoints>) -> Self {
        Self { nodes }
    }

    pub fn from_settings(settings: &FleetSettings) -> Self {
        Self::new(settings.node_table())
    }

    /// Add a node.
    pub fn with_node(mut self, node: impl Into<NodeId>, endpoints: NodeEndpoints) -> Self {
        self.nodes.insert(node.into(), endpoints);
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[async_trait]
impl NodeResolver for StaticNodeResolver {
    async fn resolve(&self, node: &NodeId) -> Option<NodeEndpoints> {
        self.nodes.get(node).cloned()
    }

    async fn all_nodes(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }
}
