//! Search fleet router
//!
//! Routes code searches to a fleet of index nodes and merges the results.
//!
//! # Usage
//!
//! ```bash
//! fleet search NODE --repos 1,2 QUERY
//! fleet fanout --target east=1,2 --target west=3 [--proxy] QUERY
//! fleet index NODE REPO_ID --storage-address ADDR --relative-path PATH [--force]
//! fleet delete NODE --repos 1,2
//! fleet truncate --yes
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/search-fleet/config.toml)
//! 3. File given with --config
//! 4. Environment variables (FLEET_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use fleet_cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli.config.as_deref(), cli.log_level.as_deref(), cli.command).await
}
