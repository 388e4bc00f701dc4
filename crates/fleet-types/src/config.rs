//! Configuration loading for the search fleet router.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! Default config file lives at ~/.config/search-fleet/config.toml.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::ids::{NodeEndpoints, NodeId};

/// How file and match counts are derived from a node response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    /// Trust the `FileCount` / `MatchCount` fields reported by the node
    #[default]
    Reported,
    /// Count the files and line matches actually present in the payload
    Computed,
}

/// One entry of the static node table.
///
/// Nodes are a list rather than a table keyed by id: the config crate
/// lowercases keys, and node ids are opaque and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub search_url: String,
    pub index_url: String,
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, endpoints: NodeEndpoints) -> Self {
        Self {
            id: id.into(),
            search_url: endpoints.search_url,
            index_url: endpoints.index_url,
        }
    }
}

/// Main router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSettings {
    /// Transport timeout for search, delete and truncate requests
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,

    /// Transport timeout for index requests
    #[serde(default = "default_index_timeout_secs")]
    pub index_timeout_secs: u64,

    /// How long the in-memory breaker keeps a node tripped
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,

    /// File/match count derivation
    #[serde(default)]
    pub count_mode: CountMode,

    /// Default `TotalMaxMatchCount`
    #[serde(default = "default_max_matches")]
    pub max_matches: u32,

    /// Default `NumContextLines`
    #[serde(default = "default_context_lines")]
    pub context_lines: u32,

    /// `FileSizeLimit` sent with index requests, in bytes
    #[serde(default = "default_file_size_limit")]
    pub file_size_limit: u64,

    /// File holding the basic-auth username
    #[serde(default)]
    pub username_file: Option<String>,

    /// File holding the basic-auth password
    #[serde(default)]
    pub password_file: Option<String>,

    /// Use server-side proxy fan-out by default
    #[serde(default)]
    pub use_proxy: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Static node table (`[[nodes]]` entries)
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

fn default_search_timeout_secs() -> u64 {
    120
}

fn default_index_timeout_secs() -> u64 {
    30 * 60
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}

fn default_max_matches() -> u32 {
    5000
}

fn default_context_lines() -> u32 {
    1
}

fn default_file_size_limit() -> u64 {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            search_timeout_secs: default_search_timeout_secs(),
            index_timeout_secs: default_index_timeout_secs(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            count_mode: CountMode::default(),
            max_matches: default_max_matches(),
            context_lines: default_context_lines(),
            file_size_limit: default_file_size_limit(),
            username_file: None,
            password_file: None,
            use_proxy: false,
            log_level: default_log_level(),
            nodes: Vec::new(),
        }
    }
}

impl FleetSettings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/search-fleet/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (FLEET_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, FleetError> {
        let config_dir = ProjectDirs::from("", "", "search-fleet")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("search_timeout_secs", default_search_timeout_secs() as i64)
            .map_err(|e| FleetError::Config(e.to_string()))?
            .set_default("index_timeout_secs", default_index_timeout_secs() as i64)
            .map_err(|e| FleetError::Config(e.to_string()))?
            .set_default("breaker_cooldown_secs", default_breaker_cooldown_secs() as i64)
            .map_err(|e| FleetError::Config(e.to_string()))?
            .set_default("max_matches", default_max_matches() as i64)
            .map_err(|e| FleetError::Config(e.to_string()))?
            .set_default("context_lines", default_context_lines() as i64)
            .map_err(|e| FleetError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| FleetError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // FLEET_SEARCH_TIMEOUT_SECS, FLEET_NODES__NODE1__SEARCH_URL, ...
        builder = builder.add_source(
            Environment::with_prefix("FLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| FleetError::Config(e.to_string()))?;

        let settings: Self = config
            .try_deserialize()
            .map_err(|e| FleetError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), FleetError> {
        if self.search_timeout_secs == 0 {
            return Err(FleetError::Config(
                "search_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.index_timeout_secs == 0 {
            return Err(FleetError::Config(
                "index_timeout_secs must be > 0".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(FleetError::Config("node id must not be empty".to_string()));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(FleetError::Config(format!(
                    "node '{}' is defined more than once",
                    node.id
                )));
            }
            if node.search_url.trim().is_empty() || node.index_url.trim().is_empty() {
                return Err(FleetError::Config(format!(
                    "node '{}' must define both search_url and index_url",
                    node.id
                )));
            }
        }
        Ok(())
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    /// The static node table keyed by typed identifiers.
    pub fn node_table(&self) -> BTreeMap<NodeId, NodeEndpoints> {
        self.nodes
            .iter()
            .map(|node| {
                (
                    NodeId::from(node.id.as_str()),
                    NodeEndpoints::new(node.search_url.clone(), node.index_url.clone()),
                )
            })
            .collect()
    }
}
