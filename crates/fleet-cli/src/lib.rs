//! Fleet CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (search, fanout, index, delete, truncate)

pub mod cli;
pub mod commands;

pub use cli::{parse_target, Cli, Commands, CountModeArg, QueryArgs};
pub use commands::{
    handle_delete, handle_fanout, handle_index, handle_search, handle_truncate, run,
    SearchOutput,
};
