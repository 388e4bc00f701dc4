//! # fleet-types
//!
//! Shared types for the search fleet router.
//!
//! - Identifiers: `NodeId`, `RepoId`, `NodeEndpoints`, `TargetMap`
//! - Queries: `Query`, `SearchMode`, `Scope`
//! - Errors: `FleetError`
//! - Settings: `FleetSettings`, `CountMode`
//!
//! ## Usage
//!
//! ```rust
//! use fleet_types::{Query, Scope, TargetMap};
//!
//! let query = Query::exact("fn main");
//! let scope = Scope::repos([1, 2, 3]);
//! let targets: TargetMap = [("node-a", vec![1, 2]), ("node-b", vec![3])]
//!     .into_iter()
//!     .collect();
//! assert_eq!(targets.len(), 2);
//! assert!(scope.repo_ids().is_ok());
//! # let _ = query;
//! ```

pub mod config;
pub mod error;
pub mod ids;
pub mod query;

pub use config::{CountMode, FleetSettings, NodeConfig};
pub use error::FleetError;
pub use ids::{NodeEndpoints, NodeId, RepoId, TargetMap};
pub use query::{Query, Scope, SearchMode};
