//! NodeSet - the daemon's single ordered, name-keyed collection of nodes.

use netsplit_env::{NodeName, NodeRuntime};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::node::{NodeConfig, NodeHandle};

/// All nodes under orchestration, in index order.
///
/// Created once at daemon start and shared by reference with the
/// scheduler and workers; never copied.
pub struct NodeSet<R: NodeRuntime> {
    nodes: Vec<Arc<NodeHandle<R>>>,
    by_name: HashMap<NodeName, usize>,
}

impl<R: NodeRuntime> NodeSet<R> {
    /// Creates `count` handles named `<prefix>0 .. <prefix>{count-1}`.
    pub fn new(runtime: Arc<R>, prefix: &str, count: usize, config: NodeConfig) -> Self {
        let handles = (0..count)
            .map(|i| NodeHandle::new(NodeName::indexed(prefix, i), runtime.clone(), config.clone()))
            .collect();
        Self::from_handles(handles)
    }

    /// Wraps pre-built handles, keeping their order.
    pub fn from_handles(handles: Vec<NodeHandle<R>>) -> Self {
        let nodes: Vec<_> = handles.into_iter().map(Arc::new).collect();
        let by_name = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name().clone(), i))
            .collect();
        Self { nodes, by_name }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &NodeName) -> Option<&Arc<NodeHandle<R>>> {
        self.by_name.get(name).map(|&i| &self.nodes[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<NodeHandle<R>>> {
        self.nodes.iter()
    }

    /// Nodes currently running, in index order.
    pub fn live(&self) -> Vec<Arc<NodeHandle<R>>> {
        self.nodes.iter().filter(|n| n.is_live()).cloned().collect()
    }

    /// Reverse lookup of a live node by address, as of right now.
    pub fn name_for_address(&self, address: &str) -> Option<NodeName> {
        if address.is_empty() {
            return None;
        }
        self.nodes
            .iter()
            .find(|n| n.is_live() && n.address() == address)
            .map(|n| n.name().clone())
    }

    /// Starts every node concurrently; returns how many came up.
    ///
    /// A node that fails to start is logged and left `Failed`.
    pub async fn start_all(&self) -> usize {
        let mut tasks = JoinSet::new();
        for node in &self.nodes {
            let node = node.clone();
            tasks.spawn(async move { node.start().await.is_ok() });
        }

        let mut started = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => error!(error = %e, "start task panicked"),
            }
        }
        info!(started, total = self.nodes.len(), "nodes started");
        started
    }

    /// Stops every node concurrently, giving each at most `per_node`.
    pub async fn stop_all(&self, per_node: Duration) {
        let mut tasks = JoinSet::new();
        for node in &self.nodes {
            let node = node.clone();
            tasks.spawn(async move {
                if tokio::time::timeout(per_node, node.stop()).await.is_err() {
                    warn!(node = %node.name(), "stop timed out");
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "stop task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use crate::LifecycleState;

    fn fast_config() -> NodeConfig {
        NodeConfig::default().with_discovery(2, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_start_all_skips_failures() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_node("n0", "10.0.0.2")
                .with_node("n1", "10.0.0.3")
                .failing_start("n1"),
        );
        let nodes = NodeSet::new(runtime, "n", 3, fast_config());

        let started = nodes.start_all().await;

        assert_eq!(started, 1);
        assert_eq!(nodes.live().len(), 1);
        assert_eq!(nodes.get(&NodeName::from("n1")).unwrap().state(), LifecycleState::Failed);
        assert_eq!(nodes.get(&NodeName::from("n2")).unwrap().state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_reverse_lookup_tracks_current_addresses() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_node("n0", "10.0.0.2")
                .with_node("n1", "10.0.0.3"),
        );
        let nodes = NodeSet::new(runtime, "n", 2, fast_config());
        nodes.start_all().await;

        assert_eq!(nodes.name_for_address("10.0.0.3"), Some(NodeName::from("n1")));
        assert_eq!(nodes.name_for_address(""), None);

        nodes.get(&NodeName::from("n1")).unwrap().stop().await;
        assert_eq!(nodes.name_for_address("10.0.0.3"), None);
    }

    #[tokio::test]
    async fn test_stop_all_reaches_every_node() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_node("n0", "10.0.0.2")
                .with_node("n1", "10.0.0.3"),
        );
        let nodes = NodeSet::new(runtime.clone(), "n", 2, fast_config());
        nodes.start_all().await;

        nodes.stop_all(Duration::from_secs(1)).await;

        let mut stopped = runtime.stop_calls();
        stopped.sort();
        assert_eq!(stopped, vec!["n0".to_string(), "n1".to_string()]);
        assert!(nodes.live().is_empty());
    }
}
