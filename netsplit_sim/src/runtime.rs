//! In-process node runtime backed by simulated links.

use async_trait::async_trait;
use netsplit_env::{EnvError, LinkController, NodeName, NodeRuntime, RuntimeState};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::network::SimLinkController;

/// How often `wait_for_state` re-checks the node.
const STATE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct SimNode {
    address: String,
    running: bool,
    started_at: Option<Instant>,
}

/// Simulated node runtime.
///
/// Nodes live in memory. A reachability check between two running nodes
/// answers `"200"` unless a partition, a loss roll or a latency above the
/// check timeout gets in the way, in which case it answers `"000"` like a
/// failed connect.
pub struct SimRuntime {
    nodes: Mutex<HashMap<NodeName, SimNode>>,
    links: SimLinkController,
    /// Time after start before a node reports its address
    dhcp_delay: Duration,
    stops: Mutex<Vec<NodeName>>,
}

impl SimRuntime {
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            links: SimLinkController::new(seed),
            dhcp_delay: Duration::ZERO,
            stops: Mutex::new(Vec::new()),
        }
    }

    /// Adds `count` nodes named `<prefix>0..` on 10.0.3.0/24.
    pub fn with_nodes(self, prefix: &str, count: usize) -> Self {
        (0..count).fold(self, |runtime, i| {
            runtime.with_node(NodeName::indexed(prefix, i), format!("10.0.3.{}", i + 2))
        })
    }

    /// Adds a stopped node with a fixed address.
    pub fn with_node(self, name: NodeName, address: impl Into<String>) -> Self {
        lock(&self.nodes).insert(
            name,
            SimNode {
                address: address.into(),
                running: false,
                started_at: None,
            },
        );
        self
    }

    pub fn with_dhcp_delay(mut self, delay: Duration) -> Self {
        self.dhcp_delay = delay;
        self
    }

    pub fn links(&self) -> &SimLinkController {
        &self.links
    }

    /// Nodes stopped so far, in call order.
    pub fn stop_calls(&self) -> Vec<NodeName> {
        lock(&self.stops).clone()
    }

    fn node(&self, name: &NodeName) -> Result<SimNode, EnvError> {
        lock(&self.nodes)
            .get(name)
            .cloned()
            .ok_or_else(|| EnvError::missing(name))
    }

    fn running_at(&self, address: &str) -> Option<NodeName> {
        lock(&self.nodes)
            .iter()
            .find(|(_, node)| node.running && node.address == address)
            .map(|(name, _)| name.clone())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl NodeRuntime for SimRuntime {
    async fn query_state(&self, node: &NodeName) -> Result<String, EnvError> {
        let state = if self.node(node)?.running {
            RuntimeState::Running
        } else {
            RuntimeState::Stopped
        };
        Ok(format!("Name:           {node}\nState:          {}\n", state.as_runtime_str()))
    }

    async fn start(&self, node: &NodeName) -> Result<(), EnvError> {
        let mut nodes = lock(&self.nodes);
        let entry = nodes.get_mut(node).ok_or_else(|| EnvError::missing(node))?;
        entry.running = true;
        entry.started_at = Some(Instant::now());
        debug!(%node, "sim node started");
        Ok(())
    }

    async fn stop(&self, node: &NodeName) -> Result<(), EnvError> {
        {
            let mut nodes = lock(&self.nodes);
            let entry = nodes.get_mut(node).ok_or_else(|| EnvError::missing(node))?;
            entry.running = false;
            entry.started_at = None;
        }
        lock(&self.stops).push(node.clone());
        debug!(%node, "sim node stopped");
        Ok(())
    }

    async fn wait_for_state(
        &self,
        node: &NodeName,
        state: RuntimeState,
        timeout: Duration,
    ) -> Result<(), EnvError> {
        let deadline = Instant::now() + timeout;
        loop {
            let report = self.query_state(node).await?;
            if RuntimeState::parse(&report) == state {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(EnvError::timeout(timeout));
            }
            tokio::time::sleep(STATE_POLL).await;
        }
    }

    async fn discover_address(&self, node: &NodeName) -> Result<String, EnvError> {
        let entry = self.node(node)?;
        let leased = entry
            .started_at
            .is_some_and(|at| at.elapsed() >= self.dhcp_delay);
        if !entry.running || !leased {
            return Ok(String::new());
        }
        Ok(format!("IP:             {}\n", entry.address))
    }

    async fn exec_remote_check(
        &self,
        node: &NodeName,
        target: &str,
        timeout: Duration,
    ) -> Result<String, EnvError> {
        if !self.node(node)?.running {
            return Err(EnvError::command_failed("lxc-attach", format!("{node} is not running")));
        }

        let Some(dest) = self.running_at(target) else {
            return Ok("000".to_string());
        };
        if !self.links.can_reach(node, &dest) || !self.links.roll_delivery(node, &dest) {
            return Ok("000".to_string());
        }

        let latency = Duration::from_millis(self.links.latency(node, &dest));
        if latency >= timeout {
            tokio::time::sleep(timeout).await;
            return Ok("000".to_string());
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok("200".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: Duration = Duration::from_secs(1);

    async fn running_pair() -> SimRuntime {
        let runtime = SimRuntime::new(1).with_nodes("n", 2);
        for i in 0..2 {
            runtime.start(&NodeName::indexed("n", i)).await.unwrap();
        }
        runtime
    }

    #[tokio::test]
    async fn test_unknown_node_is_missing() {
        let runtime = SimRuntime::new(1);
        let err = runtime.query_state(&NodeName::from("n9")).await.unwrap_err();
        assert!(matches!(err, EnvError::NodeMissing(_)));
    }

    #[tokio::test]
    async fn test_state_report_round_trips() {
        let runtime = running_pair().await;
        let n0 = NodeName::from("n0");

        let report = runtime.query_state(&n0).await.unwrap();
        assert_eq!(RuntimeState::parse(&report), RuntimeState::Running);

        runtime.stop(&n0).await.unwrap();
        runtime
            .wait_for_state(&n0, RuntimeState::Stopped, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(runtime.stop_calls(), vec![n0]);
    }

    #[tokio::test]
    async fn test_wait_for_state_times_out() {
        let runtime = SimRuntime::new(1).with_nodes("n", 1);
        let err = runtime
            .wait_for_state(&NodeName::from("n0"), RuntimeState::Running, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::Timeout(30)));
    }

    #[tokio::test]
    async fn test_address_appears_after_dhcp_delay() {
        let runtime = SimRuntime::new(1)
            .with_nodes("n", 1)
            .with_dhcp_delay(Duration::from_millis(40));
        let n0 = NodeName::from("n0");

        assert_eq!(runtime.discover_address(&n0).await.unwrap(), "");
        runtime.start(&n0).await.unwrap();
        assert_eq!(runtime.discover_address(&n0).await.unwrap(), "");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(runtime.discover_address(&n0).await.unwrap().contains("10.0.3.2"));
    }

    #[tokio::test]
    async fn test_checks_follow_link_state() {
        let runtime = running_pair().await;
        let (n0, n1) = (NodeName::from("n0"), NodeName::from("n1"));

        assert_eq!(runtime.exec_remote_check(&n0, "10.0.3.3", CHECK).await.unwrap(), "200");
        assert_eq!(runtime.exec_remote_check(&n0, "192.0.2.1", CHECK).await.unwrap(), "000");

        runtime.links().partition(&[n0.clone()], &[n1.clone()]);
        assert_eq!(runtime.exec_remote_check(&n0, "10.0.3.3", CHECK).await.unwrap(), "000");
        assert_eq!(runtime.exec_remote_check(&n0, "10.0.3.2", CHECK).await.unwrap(), "200");

        runtime.links().heal_all();
        runtime.links().set_link_latency(&n1, &n0, 5_000);
        let slow = runtime
            .exec_remote_check(&n1, "10.0.3.2", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(slow, "000");
    }

    #[tokio::test]
    async fn test_check_from_stopped_node_fails_to_attach() {
        let runtime = SimRuntime::new(1).with_nodes("n", 1);
        let result = runtime
            .exec_remote_check(&NodeName::from("n0"), "10.0.3.2", CHECK)
            .await;
        assert!(matches!(result, Err(EnvError::CommandFailed { .. })));
    }
}
