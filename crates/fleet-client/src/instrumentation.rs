//! Request counters for node traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use fleet_types::NodeId;

/// Cumulative request statistics, shared by every executor clone.
#[derive(Debug, Default)]
pub struct RequestStats {
    requests: AtomicU64,
    failures: AtomicU64,
    duration_micros: AtomicU64,
    response_bytes: AtomicU64,
}

/// Point-in-time copy of [`RequestStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub response_bytes: u64,
}

impl RequestStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_duration: Duration::from_micros(self.duration_micros.load(Ordering::Relaxed)),
            response_bytes: self.response_bytes.load(Ordering::Relaxed),
        }
    }

    /// Start timing one request. The timer records on drop.
    pub(crate) fn start(self: &Arc<Self>, node: &NodeId, operation: &'static str) -> RequestTimer {
        RequestTimer {
            stats: Arc::clone(self),
            node: node.clone(),
            operation,
            started: Instant::now(),
            response_bytes: 0,
            succeeded: false,
        }
    }
}

/// Records one request into [`RequestStats`] when dropped, whatever the outcome.
pub(crate) struct RequestTimer {
    stats: Arc<RequestStats>,
    node: NodeId,
    operation: &'static str,
    started: Instant,
    response_bytes: u64,
    succeeded: bool,
}

impl RequestTimer {
    pub(crate) fn add_bytes(&mut self, bytes: usize) {
        self.response_bytes += bytes as u64;
    }

    pub(crate) fn succeed(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let stats = &self.stats;
        stats.requests.fetch_add(1, Ordering::Relaxed);
        if !self.succeeded {
            stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        stats
            .duration_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        stats
            .response_bytes
            .fetch_add(self.response_bytes, Ordering::Relaxed);

        debug!(
            node = %self.node,
            operation = self.operation,
            duration_ms = elapsed.as_millis() as u64,
            bytes = self.response_bytes,
            success = self.succeeded,
            "Node request finished"
        );
    }
}
