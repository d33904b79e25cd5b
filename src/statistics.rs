use crate::node::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for a single node
#[derive(Debug, Default)]
pub struct NodeCounters {
    /// Number of items the node pulled from its inputs
    reads: AtomicU64,
    /// Number of items the node emitted
    writes: AtomicU64,
    /// Number of errors raised by the node
    errors: AtomicU64,
}

impl NodeCounters {
    /// Record an item read
    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an item written
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current counters
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Per-node statistics collected during a process run.
///
/// Every node must be registered before anything increments its counters;
/// incrementing an unknown node is a programming error and panics.
#[derive(Debug, Default)]
pub struct NodeStatistics {
    nodes: RwLock<HashMap<NodeId, Arc<NodeCounters>>>,
}

impl NodeStatistics {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zeroed record for `node`. Registering twice keeps the existing
    /// counters.
    pub fn register_node(&self, node: NodeId) {
        self.nodes.write().entry(node).or_default();
    }

    /// Whether `node` has a record
    pub fn is_registered(&self, node: NodeId) -> bool {
        self.nodes.read().contains_key(&node)
    }

    /// Shared handle to the counters of `node`, for hot paths that should not
    /// go through the registry lock on every increment.
    pub fn counters(&self, node: NodeId) -> Arc<NodeCounters> {
        match self.nodes.read().get(&node) {
            Some(counters) => Arc::clone(counters),
            None => panic!("statistics requested for unregistered node {node}"),
        }
    }

    /// Count one item read by `node`
    pub fn increment_reads(&self, node: NodeId) {
        self.counters(node).record_read();
    }

    /// Count one item written by `node`
    pub fn increment_writes(&self, node: NodeId) {
        self.counters(node).record_write();
    }

    /// Count one error raised by `node`
    pub fn increment_errors(&self, node: NodeId) {
        self.counters(node).record_error();
    }

    /// Read-only view of a node's counters; all zeros for unregistered nodes
    pub fn snapshot(&self, node: NodeId) -> StatisticsSnapshot {
        self.nodes
            .read()
            .get(&node)
            .map(|counters| counters.snapshot())
            .unwrap_or_default()
    }
}

/// A snapshot of a node's counters at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    /// Items pulled from the node's inputs
    pub reads: u64,
    /// Items the node emitted
    pub writes: u64,
    /// Errors the node raised
    pub errors: u64,
}

impl fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[R={}, W={}, E={}]", self.reads, self.writes, self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unregistered_snapshot_is_zero() {
        let stats = NodeStatistics::new();
        assert_eq!(stats.snapshot(NodeId::new()), StatisticsSnapshot::default());
    }

    #[test]
    fn test_increments() {
        let stats = NodeStatistics::new();
        let node = NodeId::new();
        stats.register_node(node);

        stats.increment_reads(node);
        stats.increment_reads(node);
        stats.increment_writes(node);
        stats.increment_errors(node);

        let snapshot = stats.snapshot(node);
        assert_eq!(snapshot.reads, 2);
        assert_eq!(snapshot.writes, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.to_string(), "[R=2, W=1, E=1]");
    }

    #[test]
    fn test_reregistering_keeps_counters() {
        let stats = NodeStatistics::new();
        let node = NodeId::new();
        stats.register_node(node);
        stats.increment_writes(node);
        stats.register_node(node);
        assert_eq!(stats.snapshot(node).writes, 1);
    }

    #[test]
    #[should_panic(expected = "unregistered node")]
    fn test_increment_before_registration_panics() {
        let stats = NodeStatistics::new();
        stats.increment_reads(NodeId::new());
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(NodeStatistics::new());
        let node = NodeId::new();
        stats.register_node(node);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.increment_writes(node);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.snapshot(node).writes, 4000);
    }
}
