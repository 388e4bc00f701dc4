//! Query routing across the fleet.
//!
//! A logical query runs in one of three ways:
//!
//! - **Single node**: one node, one scope, straight to the executor.
//! - **Parallel fan-out**: one task per target node, all joined before
//!   returning. A failing node becomes a failed entry in the aggregate and
//!   never cancels its siblings.
//! - **Proxy fan-out**: one request to a chosen node that queries the other
//!   targets itself and answers with a combined payload.
//!
//! Setup problems (bad input, unknown node) abort the whole call before any
//! request is sent.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use fleet_types::{
    FleetError, FleetSettings, NodeEndpoints, NodeId, Query, RepoId, Scope, TargetMap,
};

use crate::aggregate::AggregateResponse;
use crate::executor::NodeExecutor;
use crate::instrumentation::StatsSnapshot;
use crate::response::NodeResponse;
use crate::wire::{ForwardTarget, IndexTarget, ProxySearchRequest, SearchRequest};

/// Upper bound on nodes in one fan-out.
pub const MAX_FANOUT_TARGETS: usize = 16;

/// How a multi-node query is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanOut {
    /// One concurrent request per node from this process
    #[default]
    Parallel,
    /// One request to a forwarding node that fans out server-side
    Proxy,
}

/// Picks the node that receives a proxy search.
pub trait ForwardSelector: Send + Sync {
    fn select(&self, targets: &TargetMap) -> Option<NodeId>;
}

/// Forward through the node owning the most target repositories.
/// Ties go to the first node in key order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostRepositories;

impl ForwardSelector for MostRepositories {
    fn select(&self, targets: &TargetMap) -> Option<NodeId> {
        let mut best: Option<(&NodeId, usize)> = None;
        for (node, repos) in targets.iter() {
            if best.map_or(true, |(_, count)| repos.len() > count) {
                best = Some((node, repos.len()));
            }
        }
        best.map(|(node, _)| node.clone())
    }
}

struct PlannedTarget {
    node: NodeId,
    endpoints: NodeEndpoints,
    repo_ids: Vec<RepoId>,
}

/// Client for a fleet of search index nodes.
///
/// Construct once and share; all state lives behind `Arc`s.
pub struct FleetClient {
    executor: Arc<NodeExecutor>,
    selector: Arc<dyn ForwardSelector>,
    fan_out: FanOut,
}

impl FleetClient {
    pub fn new(executor: NodeExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            selector: Arc::new(MostRepositories),
            fan_out: FanOut::default(),
        }
    }

    /// HTTP client over the configured node table.
    pub fn from_settings(settings: &FleetSettings) -> Result<Self, FleetError> {
        let fan_out = if settings.use_proxy {
            FanOut::Proxy
        } else {
            FanOut::Parallel
        };
        Ok(Self::new(NodeExecutor::from_settings(settings)?).with_fan_out(fan_out))
    }

    pub fn with_selector(mut self, selector: Arc<dyn ForwardSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Strategy used by [`FleetClient::search_multi`].
    pub fn with_fan_out(mut self, fan_out: FanOut) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn fan_out(&self) -> FanOut {
        self.fan_out
    }

    pub fn executor(&self) -> &NodeExecutor {
        &self.executor
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.executor.stats().snapshot()
    }

    /// Search a single node.
    pub async fn search(
        &self,
        node: &NodeId,
        query: &Query,
        scope: &Scope,
    ) -> Result<NodeResponse, FleetError> {
        self.executor.search(node, query, scope).await
    }

    /// Search several nodes with the configured fan-out strategy.
    pub async fn search_multi(
        &self,
        targets: &TargetMap,
        query: &Query,
    ) -> Result<AggregateResponse, FleetError> {
        self.search_multi_with(targets, query, self.fan_out).await
    }

    pub async fn search_multi_with(
        &self,
        targets: &TargetMap,
        query: &Query,
        fan_out: FanOut,
    ) -> Result<AggregateResponse, FleetError> {
        match fan_out {
            FanOut::Parallel => self.search_parallel(targets, query).await,
            FanOut::Proxy => self.search_proxy(targets, query).await,
        }
    }

    /// Query every target node concurrently and wait for all of them.
    pub async fn search_parallel(
        &self,
        targets: &TargetMap,
        query: &Query,
    ) -> Result<AggregateResponse, FleetError> {
        let (wire_query, plan) = self.plan(targets, query).await?;
        let opts = self.executor.search_options(query);
        debug!(nodes = plan.len(), "Dispatching parallel search");

        let mut nodes = Vec::with_capacity(plan.len());
        let mut handles = Vec::with_capacity(plan.len());
        for target in plan {
            let executor = Arc::clone(&self.executor);
            let request = SearchRequest {
                q: wire_query.clone(),
                opts: opts.clone(),
                repo_ids: target.repo_ids,
            };
            let node = target.node.clone();
            let endpoints = target.endpoints;

            handles.push(tokio::spawn(async move {
                match executor.search_at(&node, &endpoints, &request).await {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(node = %node, error = %err, "Node search failed");
                        NodeResponse::failed(err.to_string())
                    }
                }
            }));
            nodes.push(target.node);
        }

        let joined = futures::future::join_all(handles).await;

        let responses: BTreeMap<NodeId, NodeResponse> = nodes
            .into_iter()
            .zip(joined)
            .map(|(node, outcome)| {
                let response = outcome.unwrap_or_else(|err| {
                    warn!(node = %node, error = %err, "Search worker panicked");
                    NodeResponse::failed(format!("search worker for node {} panicked", node))
                });
                (node, response)
            })
            .collect();

        Ok(AggregateResponse::new(responses))
    }

    /// Send one request to a forwarding node that queries all targets.
    ///
    /// The result holds a single entry for the forwarding node. A transport
    /// failure on that node is folded into the aggregate like a parallel
    /// branch failure.
    pub async fn search_proxy(
        &self,
        targets: &TargetMap,
        query: &Query,
    ) -> Result<AggregateResponse, FleetError> {
        let (wire_query, plan) = self.plan(targets, query).await?;

        let forward_node = self.selector.select(targets).ok_or_else(|| {
            FleetError::InvalidInput("no forwarding node could be selected".to_string())
        })?;
        let forward_endpoints = plan
            .iter()
            .find(|target| target.node == forward_node)
            .map(|target| target.endpoints.clone())
            .ok_or_else(|| {
                FleetError::InvalidInput(format!(
                    "forwarding node {} is not one of the targets",
                    forward_node
                ))
            })?;

        let request = ProxySearchRequest {
            search: SearchRequest {
                q: wire_query,
                opts: self.executor.search_options(query),
                repo_ids: plan
                    .iter()
                    .flat_map(|target| target.repo_ids.iter().copied())
                    .collect(),
            },
            forward_to: plan
                .iter()
                .map(|target| ForwardTarget {
                    endpoint: target.endpoints.search_url.clone(),
                    repo_ids: target.repo_ids.clone(),
                })
                .collect(),
        };

        debug!(
            node = %forward_node,
            targets = request.forward_to.len(),
            "Dispatching proxy search"
        );

        let response = match self
            .executor
            .proxy_search_at(&forward_node, &forward_endpoints, &request)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(node = %forward_node, error = %err, "Proxy search failed");
                NodeResponse::failed(err.to_string())
            }
        };

        Ok([(forward_node, response)].into_iter().collect())
    }

    /// Index one repository on `node`.
    pub async fn index(
        &self,
        node: &NodeId,
        target: &IndexTarget,
        force: bool,
    ) -> Result<Value, FleetError> {
        self.executor.index(node, target, force).await
    }

    /// Remove every repository in `scope` from `node`'s index.
    pub async fn delete(&self, node: &NodeId, scope: &Scope) -> Result<(), FleetError> {
        let repo_ids = scope.repo_ids()?;
        for repo_id in repo_ids {
            self.executor.delete(node, *repo_id).await?;
        }
        Ok(())
    }

    /// Truncate every known node, stopping at the first failure.
    pub async fn truncate_all_nodes(&self) -> Result<Vec<NodeId>, FleetError> {
        let nodes = self.executor.resolver().all_nodes().await;
        info!(nodes = nodes.len(), "Truncating all nodes");

        for node in &nodes {
            self.executor.truncate(node).await?;
        }
        Ok(nodes)
    }

    /// Validate a fan-out and resolve every target, before any request.
    async fn plan(
        &self,
        targets: &TargetMap,
        query: &Query,
    ) -> Result<(String, Vec<PlannedTarget>), FleetError> {
        if targets.is_empty() {
            return Err(FleetError::InvalidInput(
                "fan-out needs at least one target node".to_string(),
            ));
        }
        if targets.len() > MAX_FANOUT_TARGETS {
            return Err(FleetError::InvalidInput(format!(
                "fan-out to {} nodes exceeds the limit of {}",
                targets.len(),
                MAX_FANOUT_TARGETS
            )));
        }
        for (node, repos) in targets.iter() {
            if repos.is_empty() {
                return Err(FleetError::InvalidInput(format!(
                    "target node {} has an empty repository scope",
                    node
                )));
            }
        }

        let wire_query = self.executor.search_request(query, &[])?.q;

        let mut plan = Vec::with_capacity(targets.len());
        for (node, repos) in targets.iter() {
            let endpoints = self.executor.resolve(node).await?;
            plan.push(PlannedTarget {
                node: node.clone(),
                endpoints,
                repo_ids: repos.to_vec(),
            });
        }
        Ok((wire_query, plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::breaker::{CircuitBreaker, InMemoryBreaker};
    use crate::resolver::StaticNodeResolver;
    use crate::transport::{HttpResponse, MockTransport, Transport, TransportError};

    fn node_body(scores: &[f64], match_count: u64) -> Value {
        let files: Vec<Value> = scores
            .iter()
            .map(|s| json!({"Score": s, "LineMatches": [{}]}))
            .collect();
        json!({"Result": {"FileCount": scores.len(), "MatchCount": match_count, "Files": files}})
    }

    fn client(
        transport: MockTransport,
        nodes: &[&str],
    ) -> (FleetClient, Arc<MockTransport>, Arc<InMemoryBreaker>) {
        let transport = Arc::new(transport);
        let breaker = Arc::new(InMemoryBreaker::new(Duration::from_secs(60)));
        let resolver = nodes.iter().fold(StaticNodeResolver::default(), |r, n| {
            r.with_node(*n, NodeEndpoints::single(format!("http://{}:6070", n)))
        });
        let executor = NodeExecutor::new(transport.clone(), Arc::new(resolver), breaker.clone());
        (FleetClient::new(executor), transport, breaker)
    }

    #[test]
    fn test_most_repositories_selector() {
        let targets: TargetMap = [("a", vec![1]), ("b", vec![2, 3, 4]), ("c", vec![5, 6, 7])]
            .into_iter()
            .collect();
        assert_eq!(MostRepositories.select(&targets), Some(NodeId::from("b")));
        assert_eq!(MostRepositories.select(&TargetMap::new()), None);
    }

    #[tokio::test]
    async fn test_parallel_merges_by_score() {
        let (client, transport, _) = client(
            MockTransport::default()
                .with_json("http://a:", 200, node_body(&[9.0, 5.0, 1.0], 3))
                .with_json("http://b:", 200, node_body(&[8.0, 2.0], 2))
                .with_json("http://c:", 200, node_body(&[], 0)),
            &["a", "b", "c"],
        );
        let targets: TargetMap = [("a", vec![1]), ("b", vec![2]), ("c", vec![3])]
            .into_iter()
            .collect();

        let aggregate = client
            .search_multi(&targets, &Query::exact("foo"))
            .await
            .unwrap();

        assert!(aggregate.is_success());
        assert_eq!(transport.call_count(), 3);
        let merged: Vec<(String, f64)> = aggregate
            .files()
            .map(|(node, file)| (node.to_string(), file.score))
            .collect();
        assert_eq!(
            merged,
            vec![
                ("a".to_string(), 9.0),
                ("b".to_string(), 8.0),
                ("a".to_string(), 5.0),
                ("b".to_string(), 2.0),
                ("a".to_string(), 1.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_parallel_order_independent_of_completion() {
        let (client, _, _) = client(
            MockTransport::default()
                .with_json("http://a:", 200, node_body(&[5.0, 5.0], 2))
                .with_delay(Duration::from_millis(50))
                .with_json("http://b:", 200, node_body(&[5.0], 1)),
            &["a", "b"],
        );
        let targets: TargetMap = [("a", vec![1]), ("b", vec![2])].into_iter().collect();

        let aggregate = client
            .search_parallel(&targets, &Query::exact("foo"))
            .await
            .unwrap();
        let nodes: Vec<String> = aggregate.files().map(|(n, _)| n.to_string()).collect();
        assert_eq!(nodes, vec!["a", "a", "b"]);
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_abort() {
        let (client, _, breaker) = client(
            MockTransport::default()
                .with_json("http://n1:", 200, node_body(&[3.0], 1))
                .with_failure("http://n2:")
                .with_json("http://n3:", 200, node_body(&[4.0], 1)),
            &["n1", "n2", "n3"],
        );
        let targets: TargetMap = [("n1", vec![1]), ("n2", vec![2]), ("n3", vec![3])]
            .into_iter()
            .collect();

        let aggregate = client
            .search_parallel(&targets, &Query::exact("foo"))
            .await
            .unwrap();

        assert!(aggregate.is_failure());
        assert_eq!(aggregate.failed_nodes(), vec![&NodeId::from("n2")]);
        assert_eq!(aggregate.files().count(), 2);
        assert!(aggregate.get(&NodeId::from("n1")).unwrap().is_success());
        assert!(aggregate.get(&NodeId::from("n3")).unwrap().is_success());
        assert!(breaker.status(&NodeId::from("n2")).await.tripped);
    }

    /// Transport whose worker dies mid-request for one node.
    struct PanicsOn(&'static str);

    #[async_trait::async_trait]
    impl Transport for PanicsOn {
        async fn post_json(
            &self,
            url: &str,
            _body: &Value,
            _timeout: Duration,
        ) -> Result<HttpResponse, TransportError> {
            if url.contains(self.0) {
                panic!("connection handler crashed");
            }
            Ok(HttpResponse::ok(node_body(&[2.0], 1).to_string()))
        }

        async fn delete(
            &self,
            _url: &str,
            _timeout: Duration,
        ) -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse::ok(""))
        }
    }

    #[tokio::test]
    async fn test_panicked_worker_becomes_failed_entry() {
        let resolver = StaticNodeResolver::default()
            .with_node("a", NodeEndpoints::single("http://a:6070"))
            .with_node("b", NodeEndpoints::single("http://b:6070"));
        let breaker = Arc::new(InMemoryBreaker::new(Duration::from_secs(60)));
        let executor = NodeExecutor::new(
            Arc::new(PanicsOn("http://b:")),
            Arc::new(resolver),
            breaker.clone(),
        );
        let client = FleetClient::new(executor);
        let targets: TargetMap = [("a", vec![1]), ("b", vec![2])].into_iter().collect();

        let aggregate = client
            .search_parallel(&targets, &Query::exact("foo"))
            .await
            .unwrap();

        assert!(aggregate.is_failure());
        assert_eq!(aggregate.failed_nodes(), vec![&NodeId::from("b")]);
        assert!(aggregate.get(&NodeId::from("a")).unwrap().is_success());
        assert_eq!(aggregate.file_count(), 1);
        assert_eq!(aggregate.match_count(), 1);

        let message = aggregate
            .get(&NodeId::from("b"))
            .unwrap()
            .error_message()
            .unwrap();
        assert!(message.contains("panicked"), "got: {}", message);
        assert!(!breaker.status(&NodeId::from("b")).await.tripped);
    }

    #[tokio::test]
    async fn test_open_circuit_becomes_failed_entry() {
        let (client, transport, breaker) = client(
            MockTransport::default()
                .with_json("http://a:", 200, node_body(&[1.0], 1))
                .with_json("http://b:", 200, node_body(&[1.0], 1)),
            &["a", "b"],
        );
        breaker.trip(&NodeId::from("b")).await;
        let targets: TargetMap = [("a", vec![1]), ("b", vec![2])].into_iter().collect();

        let aggregate = client
            .search_parallel(&targets, &Query::exact("foo"))
            .await
            .unwrap();

        assert!(aggregate.is_failure());
        assert!(aggregate.error_message().contains("Circuit open"));
        assert_eq!(transport.calls_to("http://b:").len(), 0);
    }

    #[tokio::test]
    async fn test_fanout_limit() {
        let names: Vec<String> = (0..=MAX_FANOUT_TARGETS).map(|i| format!("n{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (client, transport, _) = client(MockTransport::default(), &refs);
        let targets: TargetMap = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), vec![i as RepoId]))
            .collect();
        assert_eq!(targets.len(), 17);

        for fan_out in [FanOut::Parallel, FanOut::Proxy] {
            let err = client
                .search_multi_with(&targets, &Query::exact("foo"), fan_out)
                .await
                .unwrap_err();
            assert!(matches!(err, FleetError::InvalidInput(_)));
        }
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_target_scope_rejected() {
        let (client, transport, _) = client(MockTransport::default(), &["a", "b"]);
        let mut targets = TargetMap::new();
        targets.insert(NodeId::from("a"), [1]);
        targets.insert(NodeId::from("b"), []);

        let err = client
            .search_parallel(&targets, &Query::exact("foo"))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::InvalidInput(_)));

        let err = client
            .search_parallel(&TargetMap::new(), &Query::exact("foo"))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::InvalidInput(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_target_fails_whole_call() {
        let (client, transport, _) = client(
            MockTransport::default().with_json("http://a:", 200, node_body(&[1.0], 1)),
            &["a"],
        );
        let targets: TargetMap = [("a", vec![1]), ("ghost", vec![2])].into_iter().collect();

        let err = client
            .search_parallel(&targets, &Query::exact("foo"))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::NodeNotFound(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_proxy_sends_one_request_to_largest_owner() {
        let (client, transport, _) = client(
            MockTransport::default().with_json(
                "http://b:6070/indexer/proxy_search",
                200,
                node_body(&[7.0, 3.0], 9),
            ),
            &["a", "b"],
        );
        let targets: TargetMap = [("a", vec![1]), ("b", vec![2, 3])].into_iter().collect();

        let aggregate = client
            .with_fan_out(FanOut::Proxy)
            .search_multi(&targets, &Query::regex("foo"))
            .await
            .unwrap();

        assert_eq!(aggregate.len(), 1);
        assert!(aggregate.get(&NodeId::from("b")).is_some());
        assert_eq!(aggregate.match_count(), 9);

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        let body = calls[0].body.as_ref().unwrap();
        assert_eq!(body["Q"], "foo");
        assert_eq!(body["RepoIds"], json!([1, 2, 3]));
        assert_eq!(
            body["ForwardTo"],
            json!([
                {"Endpoint": "http://a:6070", "RepoIds": [1]},
                {"Endpoint": "http://b:6070", "RepoIds": [2, 3]}
            ])
        );
    }

    #[tokio::test]
    async fn test_proxy_transport_failure_folds_into_aggregate() {
        let (client, _, breaker) = client(MockTransport::default().with_failure("http://a:"), &["a"]);
        let targets: TargetMap = [("a", vec![1])].into_iter().collect();

        let aggregate = client
            .search_proxy(&targets, &Query::exact("foo"))
            .await
            .unwrap();
        assert!(aggregate.is_failure());
        assert!(breaker.status(&NodeId::from("a")).await.tripped);
    }

    #[tokio::test]
    async fn test_delete_each_repo_and_truncate_all() {
        let (client, transport, _) = client(
            MockTransport::default()
                .with_json("/indexer/index/", 200, json!({}))
                .with_json("/indexer/truncate", 200, json!({})),
            &["a", "b"],
        );

        client
            .delete(&NodeId::from("a"), &Scope::repos([4, 5]))
            .await
            .unwrap();
        assert_eq!(transport.calls_to("/indexer/index/").len(), 2);

        let err = client
            .delete(&NodeId::from("a"), &Scope::Unrestricted)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::InvalidInput(_)));

        let truncated = client.truncate_all_nodes().await.unwrap();
        assert_eq!(truncated, vec![NodeId::from("a"), NodeId::from("b")]);
        assert_eq!(transport.calls_to("/indexer/truncate").len(), 2);
    }
}
