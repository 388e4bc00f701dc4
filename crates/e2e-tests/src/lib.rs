//! End-to-end test infrastructure for the fleet router.
//!
//! Each node is a wiremock server on a random local port. Requests go through
//! the real reqwest transport, so these tests cover wire encoding, HTTP status
//! handling and breaker behavior together.

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleet_client::{
    Credentials, ExecutorOptions, FleetClient, HttpTransport, InMemoryBreaker, NodeExecutor,
    RequestStats, StaticNodeResolver,
};
use fleet_types::{NodeEndpoints, NodeId};

/// Search API path served by every node.
pub const SEARCH: &str = "/api/search";

/// Shared test harness for E2E tests.
///
/// Holds one mock server per live node plus the addresses of nodes that
/// refuse connections. The breaker and stats are shared by every client the
/// harness builds.
pub struct TestHarness {
    servers: BTreeMap<NodeId, MockServer>,
    unreachable: BTreeMap<NodeId, String>,
    pub breaker: Arc<InMemoryBreaker>,
    pub stats: Arc<RequestStats>,
}

impl TestHarness {
    /// Start one mock server per name.
    pub async fn start(names: &[&str]) -> Self {
        let mut servers = BTreeMap::new();
        for name in names {
            servers.insert(NodeId::from(*name), MockServer::start().await);
        }

        Self {
            servers,
            unreachable: BTreeMap::new(),
            breaker: Arc::new(InMemoryBreaker::new(Duration::from_secs(60))),
            stats: RequestStats::new(),
        }
    }

    /// Register a node whose address accepts no connections.
    ///
    /// A listener claims a free port and is closed right away.
    pub fn add_unreachable(&mut self, name: &str) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind a free port");
        let addr = listener.local_addr().expect("Failed to read the free port address");
        drop(listener);
        self.unreachable.insert(NodeId::from(name), format!("http://{}", addr));
    }

    pub fn server(&self, name: &str) -> &MockServer {
        match self.servers.get(&NodeId::from(name)) {
            Some(server) => server,
            None => panic!("no mock server named {}", name),
        }
    }

    pub fn resolver(&self) -> StaticNodeResolver {
        let live = self
            .servers
            .iter()
            .map(|(node, server)| (node.clone(), server.uri()));
        let dead = self
            .unreachable
            .iter()
            .map(|(node, uri)| (node.clone(), uri.clone()));

        live.chain(dead)
            .fold(StaticNodeResolver::default(), |resolver, (node, uri)| {
                resolver.with_node(node, NodeEndpoints::single(uri))
            })
    }

    /// Client with default options and no credentials.
    pub fn client(&self) -> FleetClient {
        self.client_with(None, ExecutorOptions::default())
    }

    pub fn client_with(
        &self,
        credentials: Option<Credentials>,
        options: ExecutorOptions,
    ) -> FleetClient {
        let transport = HttpTransport::new(credentials).expect("Failed to build HTTP transport");
        let executor = NodeExecutor::new(
            Arc::new(transport),
            Arc::new(self.resolver()),
            self.breaker.clone(),
        )
        .with_options(options)
        .with_stats(self.stats.clone());
        FleetClient::new(executor)
    }

    /// Number of requests `name` has received.
    pub async fn request_count(&self, name: &str) -> usize {
        self.server(name)
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    /// JSON bodies of every request `name` has received.
    pub async fn request_bodies(&self, name: &str) -> Vec<Value> {
        self.server(name)
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| serde_json::from_slice(&request.body).unwrap_or(Value::Null))
            .collect()
    }
}

/// A search response body with one file per score.
///
/// Every file carries one line match, so computed counts equal the number
/// of files.
pub fn search_body(node: &str, scores: &[f64], match_count: u64) -> Value {
    let files: Vec<Value> = scores
        .iter()
        .enumerate()
        .map(|(i, score)| {
            json!({
                "Score": score,
                "FileName": format!("{}/file-{}.rs", node, i),
                "Repository": node,
                "LineMatches": [{"LineNumber": i + 1, "Line": "bWF0Y2g="}]
            })
        })
        .collect();

    json!({
        "Result": {
            "FileCount": scores.len(),
            "MatchCount": match_count,
            "Files": files
        }
    })
}

/// Answer every search on `server` with `body`.
pub async fn mount_search(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path(SEARCH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Write basic-auth credential files into `dir`.
pub fn write_credentials(dir: &Path, username: &str, password: &str) -> Credentials {
    let user_file = dir.join("username");
    let pass_file = dir.join("password");
    std::fs::write(&user_file, format!("{}\n", username)).expect("Failed to write username");
    std::fs::write(&pass_file, format!("{}\n", password)).expect("Failed to write password");
    Credentials::from_files(&user_file, &pass_file).expect("Failed to read credentials")
}
