//! Per-node circuit breaker capability.
//!
//! The executor reads a node's status before dispatch and trips it after a
//! transport failure. Where the state lives (process memory, a shared cache)
//! is up to the implementation; concurrent callers may race on the same node,
//! which only delays or repeats a trip.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use fleet_types::NodeId;

/// Breaker state of one node as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BreakerStatus {
    pub tripped: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BreakerStatus {
    pub fn closed() -> Self {
        Self::default()
    }

    pub fn open_until(expires_at: DateTime<Utc>) -> Self {
        Self {
            tripped: true,
            expires_at: Some(expires_at),
        }
    }

    /// Tripped and not yet expired at `now`. A trip without expiry never lapses.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.tripped && self.expires_at.map_or(true, |at| at > now)
    }
}

#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    async fn status(&self, node: &NodeId) -> BreakerStatus;

    async fn trip(&self, node: &NodeId);
}

/// Process-local breaker with a fixed cooldown.
#[derive(Debug)]
pub struct InMemoryBreaker {
    cooldown: Duration,
    trips: Mutex<HashMap<NodeId, DateTime<Utc>>>,
}

impl InMemoryBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            trips: Mutex::new(HashMap::new()),
        }
    }

    /// Nodes currently tripped.
    pub fn tripped_nodes(&self) -> Vec<NodeId> {
        let now = Utc::now();
        let mut nodes: Vec<NodeId> = self
            .lock()
            .iter()
            .filter(|(_, expires_at)| **expires_at > now)
            .map(|(node, _)| node.clone())
            .collect();
        nodes.sort();
        nodes
    }

    /// Forget every trip.
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, DateTime<Utc>>> {
        match self.trips.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CircuitBreaker for InMemoryBreaker {
    async fn status(&self, node: &NodeId) -> BreakerStatus {
        let now = Utc::now();
        let mut trips = self.lock();
        match trips.get(node).copied() {
            Some(expires_at) if expires_at > now => BreakerStatus::open_until(expires_at),
            Some(_) => {
                debug!(node = %node, "Breaker cooldown elapsed, closing");
                trips.remove(node);
                BreakerStatus::closed()
            }
            None => BreakerStatus::closed(),
        }
    }

    async fn trip(&self, node: &NodeId) {
        let cooldown = chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::zero());
        let expires_at = Utc::now() + cooldown;
        self.lock().insert(node.clone(), expires_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_open_until_expiry() {
        let now = Utc::now();
        let status = BreakerStatus::open_until(now + chrono::Duration::seconds(30));
        assert!(status.is_open_at(now));
        assert!(!status.is_open_at(now + chrono::Duration::seconds(31)));
        assert!(!BreakerStatus::closed().is_open_at(now));
    }

    #[tokio::test]
    async fn test_trip_then_status() {
        let breaker = InMemoryBreaker::new(Duration::from_secs(60));
        let node = NodeId::from("node-1");

        assert!(!breaker.status(&node).await.tripped);
        breaker.trip(&node).await;

        let status = breaker.status(&node).await;
        assert!(status.tripped);
        assert!(status.is_open_at(Utc::now()));
        assert_eq!(breaker.tripped_nodes(), vec![node.clone()]);

        breaker.reset();
        assert!(!breaker.status(&node).await.tripped);
    }

    #[tokio::test]
    async fn test_zero_cooldown_closes_immediately() {
        let breaker = InMemoryBreaker::new(Duration::ZERO);
        let node = NodeId::from("node-1");
        breaker.trip(&node).await;
        assert!(!breaker.status(&node).await.tripped);
    }
}
