//! CLI argument parsing for the fleet router.
//!
//! CLI flags override the config file and `FLEET_*` environment variables.

use clap::{Parser, Subcommand, ValueEnum};

use fleet_types::{CountMode, RepoId};

/// Search fleet router
///
/// Routes code searches to index nodes and merges their results.
#[derive(Parser, Debug)]
#[command(name = "fleet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/search-fleet/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// How file and match totals are counted.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountModeArg {
    Reported,
    Computed,
}

impl From<CountModeArg> for CountMode {
    fn from(arg: CountModeArg) -> Self {
        match arg {
            CountModeArg::Reported => CountMode::Reported,
            CountModeArg::Computed => CountMode::Computed,
        }
    }
}

/// Options shared by the search commands
#[derive(clap::Args, Debug, Clone)]
pub struct QueryArgs {
    /// Text to search for
    pub query: String,

    /// Treat the query as a regular expression
    #[arg(long)]
    pub regex: bool,

    /// Maximum number of matches per node
    #[arg(long)]
    pub max_matches: Option<u32>,

    /// Lines of context around each match
    #[arg(long)]
    pub context_lines: Option<u32>,

    /// Count mode for file and match totals
    #[arg(long, value_enum)]
    pub count_mode: Option<CountModeArg>,
}

/// Router commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search repositories on a single node
    Search {
        /// Node to query
        node: String,

        /// Repository IDs to search (comma separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        repos: Vec<RepoId>,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Search several nodes and merge the results
    Fanout {
        /// Target as NODE=ID,ID,... (repeatable)
        #[arg(short, long = "target", value_parser = parse_target, required = true)]
        targets: Vec<(String, Vec<RepoId>)>,

        /// Forward through one node instead of querying each node directly
        #[arg(long)]
        proxy: bool,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Index a repository on a node
    Index {
        /// Node that owns the repository
        node: String,

        /// Repository ID
        repo_id: RepoId,

        /// Address of the storage service holding the repository
        #[arg(long)]
        storage_address: String,

        /// Storage service token
        #[arg(long, default_value = "")]
        storage_token: String,

        /// Storage shard name
        #[arg(long, default_value = "default")]
        storage_name: String,

        /// Repository path relative to the storage shard
        #[arg(long)]
        relative_path: String,

        /// Rebuild the index even if it is current
        #[arg(short, long)]
        force: bool,
    },

    /// Remove repositories from a node's index
    Delete {
        /// Node that owns the repositories
        node: String,

        /// Repository IDs to remove (comma separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        repos: Vec<RepoId>,
    },

    /// Drop every index on every configured node
    Truncate {
        /// Confirm the truncation
        #[arg(long)]
        yes: bool,
    },
}

/// Parse `NODE=ID,ID,...`.
pub fn parse_target(value: &str) -> Result<(String, Vec<RepoId>), String> {
    let (node, repos) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NODE=ID,ID,... but got '{}'", value))?;

    let node = node.trim();
    if node.is_empty() {
        return Err(format!("missing node name in '{}'", value));
    }

    let repos = repos
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<RepoId>()
                .map_err(|_| format!("invalid repository id '{}'", id))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if repos.is_empty() {
        return Err(format!("no repository ids for node '{}'", node));
    }
    Ok((node.to_string(), repos))
}
