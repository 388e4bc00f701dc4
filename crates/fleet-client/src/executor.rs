//! Single-node request execution.
//!
//! Every request to a node goes through the same sequence: resolve the node,
//! refuse immediately if its breaker is open, perform one round trip, and
//! trip the breaker if the round trip failed at the transport level or came
//! back undecodable. A node that answers with an error payload is reachable,
//! so its breaker is left alone.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use fleet_types::{
    CountMode, FleetError, FleetSettings, NodeEndpoints, NodeId, Query, RepoId, Scope,
};

use crate::breaker::{CircuitBreaker, InMemoryBreaker};
use crate::instrumentation::{RequestStats, RequestTimer};
use crate::resolver::{NodeResolver, StaticNodeResolver};
use crate::response::NodeResponse;
use crate::translate::{DefaultQueryTranslator, QueryTranslator};
use crate::transport::{HttpResponse, HttpTransport, Transport, TransportError};
use crate::wire::{
    delete_path, IndexRequest, IndexTarget, ProxySearchRequest, SearchOptions, SearchRequest,
    INDEX_PATH, PROXY_SEARCH_PATH, SEARCH_PATH, TRUNCATE_PATH,
};

/// Per-request knobs taken from settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub search_timeout: Duration,
    pub index_timeout: Duration,
    pub count_mode: CountMode,
    pub max_matches: u32,
    pub context_lines: u32,
    pub file_size_limit: u64,
}

impl ExecutorOptions {
    pub fn from_settings(settings: &FleetSettings) -> Self {
        Self {
            search_timeout: settings.search_timeout(),
            index_timeout: settings.index_timeout(),
            count_mode: settings.count_mode,
            max_matches: settings.max_matches,
            context_lines: settings.context_lines,
            file_size_limit: settings.file_size_limit,
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_settings(&FleetSettings::default())
    }
}

/// Performs exactly one round trip to one node per call.
pub struct NodeExecutor {
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn NodeResolver>,
    breaker: Arc<dyn CircuitBreaker>,
    translator: Arc<dyn QueryTranslator>,
    stats: Arc<RequestStats>,
    options: ExecutorOptions,
}

impl NodeExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn NodeResolver>,
        breaker: Arc<dyn CircuitBreaker>,
    ) -> Self {
        Self {
            transport,
            resolver,
            breaker,
            translator: Arc::new(DefaultQueryTranslator),
            stats: RequestStats::new(),
            options: ExecutorOptions::default(),
        }
    }

    /// Executor over HTTP with the static node table and an in-memory breaker.
    pub fn from_settings(settings: &FleetSettings) -> Result<Self, FleetError> {
        settings.validate()?;
        let transport = HttpTransport::from_settings(settings)?;
        Ok(Self::new(
            Arc::new(transport),
            Arc::new(StaticNodeResolver::from_settings(settings)),
            Arc::new(InMemoryBreaker::new(settings.breaker_cooldown())),
        )
        .with_options(ExecutorOptions::from_settings(settings)))
    }

    pub fn with_translator(mut self, translator: Arc<dyn QueryTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_stats(mut self, stats: Arc<RequestStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn stats(&self) -> &Arc<RequestStats> {
        &self.stats
    }

    pub fn resolver(&self) -> &Arc<dyn NodeResolver> {
        &self.resolver
    }

    /// Endpoints of `node`, or `NodeNotFound`.
    pub async fn resolve(&self, node: &NodeId) -> Result<NodeEndpoints, FleetError> {
        self.resolver
            .resolve(node)
            .await
            .ok_or_else(|| FleetError::NodeNotFound(node.clone()))
    }

    /// Translate `query` and build the wire request for `repo_ids`.
    pub fn search_request(
        &self,
        query: &Query,
        repo_ids: &[RepoId],
    ) -> Result<SearchRequest, FleetError> {
        Ok(SearchRequest {
            q: self.translator.translate(query)?,
            opts: self.search_options(query),
            repo_ids: repo_ids.to_vec(),
        })
    }

    pub fn search_options(&self, query: &Query) -> SearchOptions {
        SearchOptions {
            total_max_match_count: query.max_matches.unwrap_or(self.options.max_matches),
            num_context_lines: query.context_lines.unwrap_or(self.options.context_lines),
        }
    }

    /// Search one node.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an empty/unrestricted scope or an untranslatable
    ///   query, before anything else happens
    /// - `NodeNotFound` if the node does not resolve
    /// - `CircuitOpen` if the node's breaker is open (no request is sent)
    /// - `Connection` / `Decode` on transport failure (the breaker is tripped)
    ///
    /// A node that answers with an error payload yields `Ok` with a failed
    /// [`NodeResponse`].
    pub async fn search(
        &self,
        node: &NodeId,
        query: &Query,
        scope: &Scope,
    ) -> Result<NodeResponse, FleetError> {
        let repo_ids = scope.repo_ids()?;
        let request = self.search_request(query, repo_ids)?;
        let timer = self.stats.start(node, "search");
        let endpoints = self.resolve(node).await?;
        let url = endpoints.search_path(SEARCH_PATH);
        self.post_search(node, timer, &url, &request).await
    }

    /// Search an already-resolved node with a prepared request.
    pub async fn search_at(
        &self,
        node: &NodeId,
        endpoints: &NodeEndpoints,
        request: &SearchRequest,
    ) -> Result<NodeResponse, FleetError> {
        let url = endpoints.search_path(SEARCH_PATH);
        let timer = self.stats.start(node, "search");
        self.post_search(node, timer, &url, request).await
    }

    /// Send a proxy search to `node`, which fans out on our behalf.
    pub async fn proxy_search_at(
        &self,
        node: &NodeId,
        endpoints: &NodeEndpoints,
        request: &ProxySearchRequest,
    ) -> Result<NodeResponse, FleetError> {
        let url = endpoints.search_path(PROXY_SEARCH_PATH);
        let timer = self.stats.start(node, "proxy_search");
        self.post_search(node, timer, &url, request).await
    }

    /// Ask `node` to index one repository.
    pub async fn index(
        &self,
        node: &NodeId,
        target: &IndexTarget,
        force: bool,
    ) -> Result<Value, FleetError> {
        let mut timer = self.stats.start(node, "index");
        let endpoints = self.resolve(node).await?;
        let request = IndexRequest {
            gitaly_connection_info: target.connection.clone(),
            callback: target.callback.clone(),
            repo_id: target.repo_id,
            file_size_limit: self.options.file_size_limit,
            timeout: format!("{}s", self.options.index_timeout.as_secs()),
            force,
        };
        let body = to_body(&request)?;
        let url = endpoints.index_path(INDEX_PATH);
        let timeout = self.options.index_timeout;

        info!(node = %node, repo_id = target.repo_id, force, "Indexing repository");
        let result = self
            .guarded(node, async {
                let response = self
                    .transport
                    .post_json(&url, &body, timeout)
                    .await
                    .map_err(|e| connection_error(node, e))?;
                timer.add_bytes(response.body.len());
                decode_admin(node, &response)
            })
            .await;
        if result.is_ok() {
            timer.succeed();
        }
        result
    }

    /// Remove one repository from `node`'s index.
    pub async fn delete(&self, node: &NodeId, repo_id: RepoId) -> Result<Value, FleetError> {
        let mut timer = self.stats.start(node, "delete");
        let endpoints = self.resolve(node).await?;
        let url = endpoints.index_path(&delete_path(repo_id));
        let timeout = self.options.search_timeout;

        info!(node = %node, repo_id, "Deleting repository from index");
        let result = self
            .guarded(node, async {
                let response = self
                    .transport
                    .delete(&url, timeout)
                    .await
                    .map_err(|e| connection_error(node, e))?;
                timer.add_bytes(response.body.len());
                decode_admin(node, &response)
            })
            .await;
        if result.is_ok() {
            timer.succeed();
        }
        result
    }

    /// Drop every repository on `node`.
    pub async fn truncate(&self, node: &NodeId) -> Result<Value, FleetError> {
        let mut timer = self.stats.start(node, "truncate");
        let endpoints = self.resolve(node).await?;
        let url = endpoints.index_path(TRUNCATE_PATH);
        let timeout = self.options.search_timeout;
        let body = Value::Object(Default::default());

        info!(node = %node, "Truncating node");
        let result = self
            .guarded(node, async {
                let response = self
                    .transport
                    .post_json(&url, &body, timeout)
                    .await
                    .map_err(|e| connection_error(node, e))?;
                timer.add_bytes(response.body.len());
                decode_admin(node, &response)
            })
            .await;
        if result.is_ok() {
            timer.succeed();
        }
        result
    }

    async fn post_search<T: Serialize>(
        &self,
        node: &NodeId,
        mut timer: RequestTimer,
        url: &str,
        request: &T,
    ) -> Result<NodeResponse, FleetError> {
        let body = to_body(request)?;
        let timeout = self.options.search_timeout;
        let count_mode = self.options.count_mode;

        let result = self
            .guarded(node, async {
                let response = self
                    .transport
                    .post_json(url, &body, timeout)
                    .await
                    .map_err(|e| connection_error(node, e))?;
                timer.add_bytes(response.body.len());
                decode_search(node, &response, count_mode)
            })
            .await;

        if matches!(&result, Ok(response) if response.is_success()) {
            timer.succeed();
        }
        result
    }

    /// Run `request` unless the breaker is open; trip it on transport failure.
    async fn guarded<T, F>(&self, node: &NodeId, request: F) -> Result<T, FleetError>
    where
        F: Future<Output = Result<T, FleetError>>,
    {
        let status = self.breaker.status(node).await;
        if status.is_open_at(Utc::now()) {
            debug!(node = %node, expires_at = ?status.expires_at, "Circuit open, skipping request");
            return Err(FleetError::CircuitOpen {
                node: node.clone(),
                expires_at: status.expires_at.unwrap_or_else(Utc::now),
            });
        }

        match request.await {
            Err(err) if err.trips_breaker() => {
                warn!(node = %node, error = %err, "Node request failed, tripping breaker");
                self.breaker.trip(node).await;
                Err(err)
            }
            other => other,
        }
    }
}

fn to_body<T: Serialize>(request: &T) -> Result<Value, FleetError> {
    serde_json::to_value(request)
        .map_err(|e| FleetError::InvalidInput(format!("cannot encode request: {}", e)))
}

fn connection_error(node: &NodeId, err: TransportError) -> FleetError {
    FleetError::Connection {
        node: node.clone(),
        message: err.to_string(),
    }
}

fn decode_search(
    node: &NodeId,
    response: &HttpResponse,
    count_mode: CountMode,
) -> Result<NodeResponse, FleetError> {
    let decoded =
        NodeResponse::from_json(&response.body, count_mode).map_err(|e| FleetError::Decode {
            node: node.clone(),
            message: e.to_string(),
        })?;

    if !response.is_success() && decoded.is_success() {
        return Ok(NodeResponse::failed(format!(
            "node {} answered HTTP {}",
            node, response.status
        )));
    }
    Ok(decoded)
}

fn decode_admin(node: &NodeId, response: &HttpResponse) -> Result<Value, FleetError> {
    if response.status == 429 {
        return Err(FleetError::TooManyRequests { node: node.clone() });
    }
    if !response.is_success() {
        return Err(FleetError::RequestFailed {
            node: node.clone(),
            status: response.status,
            body: response.body.clone(),
        });
    }
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }

    let value: Value = serde_json::from_str(&response.body).map_err(|e| FleetError::Decode {
        node: node.clone(),
        message: e.to_string(),
    })?;

    let error = value
        .get("Error")
        .or_else(|| value.get("error"))
        .and_then(Value::as_str)
        .filter(|message| !message.trim().is_empty());
    if let Some(message) = error {
        return Err(FleetError::RequestFailed {
            node: node.clone(),
            status: response.status,
            body: message.to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use crate::wire::StorageConnection;
    use serde_json::json;

    struct Fixture {
        executor: NodeExecutor,
        transport: Arc<MockTransport>,
        breaker: Arc<InMemoryBreaker>,
    }

    fn fixture(transport: MockTransport) -> Fixture {
        let transport = Arc::new(transport);
        let breaker = Arc::new(InMemoryBreaker::new(Duration::from_secs(60)));
        let resolver = StaticNodeResolver::default()
            .with_node("n1", NodeEndpoints::new("http://n1:6070", "http://n1:6080"))
            .with_node("n2", NodeEndpoints::single("http://n2:6070"));
        let executor = NodeExecutor::new(transport.clone(), Arc::new(resolver), breaker.clone());
        Fixture {
            executor,
            transport,
            breaker,
        }
    }

    fn ok_body() -> Value {
        json!({"Result": {"FileCount": 1, "MatchCount": 2, "Files": [
            {"Score": 1.5, "FileName": "a.rs", "LineMatches": [{}, {}]}
        ]}})
    }

    fn index_target(repo_id: RepoId) -> IndexTarget {
        IndexTarget {
            repo_id,
            connection: StorageConnection {
                address: "tcp://gitaly:8075".to_string(),
                token: "secret".to_string(),
                storage: "default".to_string(),
                path: "group/project.git".to_string(),
            },
            callback: None,
        }
    }

    #[tokio::test]
    async fn test_search_sends_wire_request() {
        let f = fixture(MockTransport::default().with_json("n1:6070/api/search", 200, ok_body()));

        let response = f
            .executor
            .search(
                &NodeId::from("n1"),
                &Query::regex("foo.*bar").with_max_matches(50),
                &Scope::repos([7, 8]),
            )
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.match_count(), 2);

        let calls = f.transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "http://n1:6070/api/search");
        assert_eq!(
            calls[0].body,
            Some(json!({
                "Q": "foo.*bar",
                "Opts": {"TotalMaxMatchCount": 50, "NumContextLines": 1},
                "RepoIds": [7, 8]
            }))
        );
    }

    #[tokio::test]
    async fn test_invalid_scope_makes_no_calls() {
        let f = fixture(MockTransport::default().with_json("n1", 200, ok_body()));
        let node = NodeId::from("n1");

        for scope in [Scope::Unrestricted, Scope::repos([])] {
            let err = f
                .executor
                .search(&node, &Query::exact("foo"), &scope)
                .await
                .unwrap_err();
            assert!(matches!(err, FleetError::InvalidInput(_)));
        }
        assert_eq!(f.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_found() {
        let f = fixture(MockTransport::default());
        let err = f
            .executor
            .search(&NodeId::from("ghost"), &Query::exact("x"), &Scope::repos([1]))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::NodeNotFound(ref n) if n.as_str() == "ghost"));
    }

    #[tokio::test]
    async fn test_unknown_node_is_recorded_as_failure() {
        let f = fixture(MockTransport::default());
        let ghost = NodeId::from("ghost");

        let _ = f
            .executor
            .search(&ghost, &Query::exact("x"), &Scope::repos([1]))
            .await;
        let _ = f.executor.index(&ghost, &index_target(1), false).await;
        let _ = f.executor.delete(&ghost, 1).await;
        let _ = f.executor.truncate(&ghost).await;

        let snapshot = f.executor.stats().snapshot();
        assert_eq!(snapshot.requests, 4);
        assert_eq!(snapshot.failures, 4);
        assert_eq!(snapshot.response_bytes, 0);
        assert_eq!(f.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits() {
        let f = fixture(MockTransport::default().with_json("n1", 200, ok_body()));
        let node = NodeId::from("n1");
        f.breaker.trip(&node).await;

        let err = f
            .executor
            .search(&node, &Query::exact("foo"), &Scope::repos([1]))
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::CircuitOpen { .. }));
        assert_eq!(f.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_trips_breaker() {
        let f = fixture(MockTransport::default().with_failure("n1"));
        let node = NodeId::from("n1");

        let err = f
            .executor
            .search(&node, &Query::exact("foo"), &Scope::repos([1]))
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::Connection { .. }));
        assert_eq!(f.breaker.tripped_nodes(), vec![node.clone()]);

        // Next call is refused without touching the transport
        let calls_before = f.transport.call_count();
        let err = f
            .executor
            .search(&node, &Query::exact("foo"), &Scope::repos([1]))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::CircuitOpen { .. }));
        assert_eq!(f.transport.call_count(), calls_before);
    }

    #[tokio::test]
    async fn test_malformed_body_trips_breaker() {
        let f = fixture(
            MockTransport::default().with_response("n1", HttpResponse::ok("<html>oops</html>")),
        );
        let err = f
            .executor
            .search(&NodeId::from("n1"), &Query::exact("foo"), &Scope::repos([1]))
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::Decode { .. }));
        assert_eq!(f.breaker.tripped_nodes().len(), 1);
    }

    #[tokio::test]
    async fn test_error_payload_is_soft_failure() {
        let f = fixture(MockTransport::default().with_json(
            "n1",
            200,
            json!({"Error": "regexp: missing closing )"}),
        ));
        let response = f
            .executor
            .search(&NodeId::from("n1"), &Query::exact("foo"), &Scope::repos([1]))
            .await
            .unwrap();

        assert!(response.is_failure());
        assert_eq!(response.error_message(), Some("regexp: missing closing )"));
        assert!(f.breaker.tripped_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_both_error_casings_do_not_trip_breaker() {
        let f = fixture(MockTransport::default().with_json(
            "n1",
            200,
            json!({"Error": "bad", "error": "bad"}),
        ));
        let node = NodeId::from("n1");
        let response = f
            .executor
            .search(&node, &Query::exact("foo"), &Scope::repos([1]))
            .await
            .unwrap();

        assert!(response.is_failure());
        assert_eq!(response.error_message(), Some("bad"));
        assert!(!f.breaker.status(&node).await.tripped);
    }

    #[tokio::test]
    async fn test_non_success_status_without_error_field() {
        let f = fixture(MockTransport::default().with_json("n1", 500, json!({})));
        let response = f
            .executor
            .search(&NodeId::from("n1"), &Query::exact("foo"), &Scope::repos([1]))
            .await
            .unwrap();
        assert!(response.is_failure());
        assert!(response.error_message().unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_stats_recorded_on_every_outcome() {
        let f = fixture(
            MockTransport::default()
                .with_json("n1", 200, ok_body())
                .with_failure("n2"),
        );
        let query = Query::exact("foo");
        let scope = Scope::repos([1]);

        f.executor
            .search(&NodeId::from("n1"), &query, &scope)
            .await
            .unwrap();
        let _ = f.executor.search(&NodeId::from("n2"), &query, &scope).await;
        let _ = f.executor.search(&NodeId::from("n2"), &query, &scope).await;

        let snapshot = f.executor.stats().snapshot();
        assert_eq!(snapshot.requests, 3);
        assert_eq!(snapshot.failures, 2);
        assert!(snapshot.response_bytes > 0);
    }

    #[tokio::test]
    async fn test_index_request_and_timeout() {
        let f = fixture(MockTransport::default().with_json(
            "n1:6080/indexer/index",
            200,
            json!({"Success": true}),
        ));

        let value = f
            .executor
            .index(&NodeId::from("n1"), &index_target(42), true)
            .await
            .unwrap();
        assert_eq!(value["Success"], true);

        let call = &f.transport.calls()[0];
        assert_eq!(call.timeout, Duration::from_secs(1800));
        let body = call.body.as_ref().unwrap();
        assert_eq!(body["RepoId"], 42);
        assert_eq!(body["Timeout"], "1800s");
        assert_eq!(body["Force"], true);
        assert_eq!(body["FileSizeLimit"], 1024 * 1024);
        assert_eq!(body["GitalyConnectionInfo"]["Storage"], "default");
    }

    #[tokio::test]
    async fn test_index_rate_limited() {
        let f = fixture(MockTransport::default().with_json("n1", 429, json!({})));
        let err = f
            .executor
            .index(&NodeId::from("n1"), &index_target(1), false)
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::TooManyRequests { .. }));
        assert!(f.breaker.tripped_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_index_request_failed() {
        let f = fixture(MockTransport::default().with_response(
            "n1",
            HttpResponse::new(503, "unavailable"),
        ));
        let err = f
            .executor
            .index(&NodeId::from("n1"), &index_target(1), false)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::RequestFailed { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_delete_and_truncate_paths() {
        let f = fixture(
            MockTransport::default()
                .with_response("/indexer/index/9", HttpResponse::ok(""))
                .with_json("/indexer/truncate", 200, json!({})),
        );
        let node = NodeId::from("n1");

        assert_eq!(f.executor.delete(&node, 9).await.unwrap(), Value::Null);
        f.executor.truncate(&node).await.unwrap();

        let calls = f.transport.calls();
        assert_eq!(calls[0].method, "DELETE");
        assert_eq!(calls[0].url, "http://n1:6080/indexer/index/9");
        assert_eq!(calls[1].url, "http://n1:6080/indexer/truncate");
    }

    #[tokio::test]
    async fn test_admin_error_payload_is_request_failed() {
        let f = fixture(MockTransport::default().with_json(
            "n1",
            200,
            json!({"error": "disk full"}),
        ));
        let err = f.executor.truncate(&NodeId::from("n1")).await.unwrap_err();
        assert!(matches!(err, FleetError::RequestFailed { ref body, .. } if body == "disk full"));
    }
}
