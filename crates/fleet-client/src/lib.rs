//! Client library for a fleet of search index nodes.
//!
//! This crate provides:
//! - `FleetClient` for single-node, parallel and proxy searches
//! - `NodeExecutor` for one request to one node behind a circuit breaker
//! - `AggregateResponse` with a streaming merge of per-node results by score
//! - Admin operations: index, delete and truncate
//!
//! # Example
//!
//! ```rust,no_run
//! use fleet_client::FleetClient;
//! use fleet_types::{FleetSettings, Query, TargetMap};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = FleetSettings::load(None)?;
//!     let client = FleetClient::from_settings(&settings)?;
//!
//!     let targets: TargetMap = [("east", vec![1, 2]), ("west", vec![3])]
//!         .into_iter()
//!         .collect();
//!     let results = client.search_multi(&targets, &Query::exact("fn main")).await?;
//!
//!     for (node, file) in results.files() {
//!         println!("{} {} {:.2}", node, file.file_name, file.score);
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod breaker;
pub mod executor;
pub mod instrumentation;
pub mod merge;
pub mod resolver;
pub mod response;
pub mod router;
pub mod translate;
pub mod transport;
pub mod wire;

pub use aggregate::AggregateResponse;
pub use breaker::{BreakerStatus, CircuitBreaker, InMemoryBreaker};
pub use executor::{ExecutorOptions, NodeExecutor};
pub use instrumentation::{RequestStats, StatsSnapshot};
pub use merge::ScoreMerge;
pub use resolver::{NodeResolver, StaticNodeResolver};
pub use response::NodeResponse;
pub use router::{FanOut, FleetClient, ForwardSelector, MostRepositories, MAX_FANOUT_TARGETS};
pub use translate::{DefaultQueryTranslator, QueryTranslator};
pub use transport::{
    Credentials, HttpResponse, HttpTransport, MockTransport, RecordedCall, Transport,
    TransportError,
};
pub use wire::{FileMatch, IndexCallback, IndexTarget, SearchPayload, StorageConnection};
