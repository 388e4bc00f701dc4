//! Command implementations for the fleet CLI.
//!
//! Each command loads settings, starts logging and talks to the fleet
//! through a [`FleetClient`]. Results are printed to stdout as JSON; logs go
//! to stderr.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use fleet_client::{
    AggregateResponse, FanOut, FileMatch, FleetClient, IndexTarget, NodeResponse,
    StorageConnection,
};
use fleet_types::{FleetSettings, NodeId, Query, RepoId, Scope, SearchMode, TargetMap};

use crate::cli::{Commands, QueryArgs};

/// Per-node outcome in command output
#[derive(Debug, Serialize)]
pub struct NodeSummary<'a> {
    pub node: &'a NodeId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
    pub file_count: u64,
    pub match_count: u64,
}

/// One file in merged order
#[derive(Debug, Serialize)]
pub struct MergedFile<'a> {
    pub node: &'a NodeId,
    #[serde(flatten)]
    pub file: &'a FileMatch,
}

/// Output of `search` and `fanout`
#[derive(Debug, Serialize)]
pub struct SearchOutput<'a> {
    pub success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub file_count: u64,
    pub match_count: u64,
    pub nodes: Vec<NodeSummary<'a>>,
    pub files: Vec<MergedFile<'a>>,
}

impl<'a> SearchOutput<'a> {
    pub fn from_aggregate(aggregate: &'a AggregateResponse) -> Self {
        let nodes = aggregate
            .responses()
            .iter()
            .map(|(node, response)| summarize(node, response))
            .collect();
        let files = aggregate
            .files()
            .map(|(node, file)| MergedFile { node, file })
            .collect();

        Self {
            success: aggregate.is_success(),
            error: aggregate.error_message(),
            file_count: aggregate.file_count(),
            match_count: aggregate.match_count(),
            nodes,
            files,
        }
    }
}

fn summarize<'a>(node: &'a NodeId, response: &'a NodeResponse) -> NodeSummary<'a> {
    NodeSummary {
        node,
        success: response.is_success(),
        error: response.error_message(),
        file_count: response.file_count(),
        match_count: response.match_count(),
    }
}

/// Load settings and apply the global CLI overrides.
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<FleetSettings> {
    let mut settings = FleetSettings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Build a [`Query`] from the search flags.
pub fn build_query(args: &QueryArgs) -> Query {
    let mode = if args.regex {
        SearchMode::Regex
    } else {
        SearchMode::Exact
    };
    let mut query = Query::new(args.query.clone(), mode);
    if let Some(max) = args.max_matches {
        query = query.with_max_matches(max);
    }
    if let Some(lines) = args.context_lines {
        query = query.with_context_lines(lines);
    }
    query
}

fn apply_query_overrides(settings: &mut FleetSettings, args: &QueryArgs) {
    if let Some(mode) = args.count_mode {
        settings.count_mode = mode.into();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}

/// Dispatch one parsed command.
pub async fn run(
    config_path: Option<&str>,
    log_level: Option<&str>,
    command: Commands,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level)?;
    if let Commands::Search { query, .. } | Commands::Fanout { query, .. } = &command {
        apply_query_overrides(&mut settings, query);
    }
    init_logging(&settings.log_level)?;
    info!(nodes = settings.nodes.len(), "Fleet configuration loaded");

    let client = FleetClient::from_settings(&settings).context("Failed to build fleet client")?;

    match command {
        Commands::Search { node, repos, query } => {
            handle_search(&client, NodeId::new(node), repos, &build_query(&query)).await
        }
        Commands::Fanout {
            targets,
            proxy,
            query,
        } => {
            let fan_out = if proxy { FanOut::Proxy } else { client.fan_out() };
            handle_fanout(&client, targets, &build_query(&query), fan_out).await
        }
        Commands::Index {
            node,
            repo_id,
            storage_address,
            storage_token,
            storage_name,
            relative_path,
            force,
        } => {
            let target = IndexTarget {
                repo_id,
                connection: StorageConnection {
                    address: storage_address,
                    token: storage_token,
                    storage: storage_name,
                    path: relative_path,
                },
                callback: None,
            };
            handle_index(&client, NodeId::new(node), &target, force).await
        }
        Commands::Delete { node, repos } => handle_delete(&client, NodeId::new(node), repos).await,
        Commands::Truncate { yes } => handle_truncate(&client, yes).await,
    }
}

/// Search one node and print the response.
pub async fn handle_search(
    client: &FleetClient,
    node: NodeId,
    repos: Vec<RepoId>,
    query: &Query,
) -> Result<()> {
    let response = client
        .search(&node, query, &Scope::Repos(repos))
        .await
        .with_context(|| format!("Search on node {} failed", node))?;

    let aggregate: AggregateResponse = [(node, response)].into_iter().collect();
    report(&aggregate)
}

/// Search several nodes and print the merged result.
pub async fn handle_fanout(
    client: &FleetClient,
    targets: Vec<(String, Vec<RepoId>)>,
    query: &Query,
    fan_out: FanOut,
) -> Result<()> {
    let targets: TargetMap = targets.into_iter().collect();
    let aggregate = client
        .search_multi_with(&targets, query, fan_out)
        .await
        .context("Fan-out search failed")?;
    report(&aggregate)
}

fn report(aggregate: &AggregateResponse) -> Result<()> {
    if aggregate.is_failure() {
        warn!(
            failed = aggregate.failed_nodes().len(),
            error = %aggregate.error_message(),
            "Some nodes failed"
        );
    }
    print_json(&SearchOutput::from_aggregate(aggregate))
}

pub async fn handle_index(
    client: &FleetClient,
    node: NodeId,
    target: &IndexTarget,
    force: bool,
) -> Result<()> {
    let response: Value = client
        .index(&node, target, force)
        .await
        .with_context(|| format!("Indexing repository {} on node {} failed", target.repo_id, node))?;
    print_json(&response)
}

pub async fn handle_delete(client: &FleetClient, node: NodeId, repos: Vec<RepoId>) -> Result<()> {
    let scope = Scope::Repos(repos);
    client
        .delete(&node, &scope)
        .await
        .with_context(|| format!("Delete on node {} failed", node))?;
    print_json(&serde_json::json!({ "node": node, "deleted": scope.repo_ids()? }))
}

pub async fn handle_truncate(client: &FleetClient, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("Refusing to truncate every node without --yes");
    }
    let truncated = client
        .truncate_all_nodes()
        .await
        .context("Truncate failed")?;
    print_json(&serde_json::json!({ "truncated": truncated }))
}
