//! Error types for the search fleet router.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ids::NodeId;

/// Unified error type for router and node operations.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Caller supplied something the router refuses before any network activity
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The node registry has no entry for this identifier
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The node's breaker is tripped; no request was sent
    #[error("Circuit open for node {node} until {expires_at}")]
    CircuitOpen {
        node: NodeId,
        expires_at: DateTime<Utc>,
    },

    /// Network-level failure (connect refused, timeout, reset)
    #[error("Connection to node {node} failed: {message}")]
    Connection { node: NodeId, message: String },

    /// The node answered with a body that is not the expected JSON
    #[error("Malformed response from node {node}: {message}")]
    Decode { node: NodeId, message: String },

    /// The node answered HTTP 429
    #[error("Too many requests to node {node}")]
    TooManyRequests { node: NodeId },

    /// The node answered with a non-success status
    #[error("Request to node {node} failed with HTTP {status}: {body}")]
    RequestFailed {
        node: NodeId,
        status: u16,
        body: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FleetError {
    /// Whether this failure should trip the node's breaker.
    ///
    /// Only transport-level failures count. Application errors, rate limiting
    /// and an already-open circuit leave the breaker alone.
    pub fn trips_breaker(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Decode { .. })
    }

    /// Whether a caller-side retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::Connection { .. }
                | Self::Decode { .. }
                | Self::TooManyRequests { .. }
        )
    }

    /// The node this error concerns, if any.
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            Self::NodeNotFound(node)
            | Self::CircuitOpen { node, .. }
            | Self::Connection { node, .. }
            | Self::Decode { node, .. }
            | Self::TooManyRequests { node }
            | Self::RequestFailed { node, .. } => Some(node),
            Self::InvalidInput(_) | Self::Config(_) => None,
        }
    }
}
