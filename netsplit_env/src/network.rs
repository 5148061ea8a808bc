//! Link fault-injection abstraction.

use crate::types::NodeName;

/// Controller for deliberately breaking connectivity between nodes.
///
/// Implemented by runtimes that own their network (the simulator); the
/// daemon uses it to set up partitions before probing starts.
pub trait LinkController: Send + Sync {
    /// Creates a network partition between two node sets.
    fn partition(&self, group_a: &[NodeName], group_b: &[NodeName]);

    /// Heals all partitions.
    fn heal_all(&self);

    /// Sets latency for a specific directed link.
    fn set_link_latency(&self, from: &NodeName, to: &NodeName, latency_ms: u64);

    /// Sets packet loss probability for a directed link (0.0 - 1.0).
    fn set_link_loss(&self, from: &NodeName, to: &NodeName, loss_rate: f64);

    /// Returns whether `from` can currently reach `to` (partitions only).
    fn can_reach(&self, from: &NodeName, to: &NodeName) -> bool;
}
