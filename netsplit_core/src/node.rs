//! Node lifecycle - one handle per orchestrated node.
//!
//! A `NodeHandle` owns a node's identity, its discovered address and its
//! lifecycle state, and wraps every call to the `NodeRuntime`.
//!
//! # State Machine
//!
//! ```text
//! Absent ──► Starting ──► Running ──► Stopping ──► Stopped
//!    │           │
//!    └───────────┴──► Failed   (missing node, start failure, not ready)
//! ```
//!
//! The address is only ever non-empty while the node is `Running`.

use netsplit_env::{EnvError, NodeName, NodeRuntime, RuntimeState};
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::CoreError;

/// Lifecycle state of a node as tracked by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Initial presumed state, never re-entered
    #[default]
    Absent,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// Terminal: the node is excluded from the rest of the run
    Failed,
}

/// Bounded retry budget for address discovery.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryPolicy {
    /// Total number of queries before giving up
    pub attempts: u32,

    /// Pause between consecutive queries
    pub delay: Duration,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            delay: Duration::from_millis(800),
        }
    }
}

/// Configuration for a node handle.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Wait this long for RUNNING after a start (None = don't wait)
    pub readiness_timeout: Option<Duration>,

    /// Wait this long for STOPPED after a stop (None = don't wait)
    pub stop_timeout: Option<Duration>,

    /// Address discovery retry budget
    pub discovery: DiscoveryPolicy,

    /// Timeout handed to the reachability check itself
    pub check_timeout: Duration,

    /// Upper bound on any single runtime invocation
    pub call_timeout: Duration,

    /// Check output that counts as reachable
    pub success_code: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: Some(Duration::from_secs(20)),
            stop_timeout: Some(Duration::from_secs(20)),
            discovery: DiscoveryPolicy::default(),
            check_timeout: Duration::from_secs(1),
            call_timeout: Duration::from_secs(3),
            success_code: "200".to_string(),
        }
    }
}

impl NodeConfig {
    /// Sets the discovery retry budget.
    pub fn with_discovery(mut self, attempts: u32, delay: Duration) -> Self {
        self.discovery = DiscoveryPolicy { attempts, delay };
        self
    }

    /// Sets the readiness timeouts used by start and stop.
    pub fn with_readiness(mut self, start: Option<Duration>, stop: Option<Duration>) -> Self {
        self.readiness_timeout = start;
        self.stop_timeout = stop;
        self
    }

    /// Sets the reachability check timeout and the runtime call ceiling.
    pub fn with_check_timeouts(mut self, check: Duration, call: Duration) -> Self {
        self.check_timeout = check;
        self.call_timeout = call;
        self
    }
}

#[derive(Debug, Default)]
struct NodeStatus {
    state: LifecycleState,
    address: String,
}

/// Handle to one node under orchestration.
pub struct NodeHandle<R: NodeRuntime> {
    name: NodeName,
    runtime: Arc<R>,
    config: NodeConfig,
    status: RwLock<NodeStatus>,
}

impl<R: NodeRuntime> NodeHandle<R> {
    /// Creates a handle in the `Absent` state.
    pub fn new(name: NodeName, runtime: Arc<R>, config: NodeConfig) -> Self {
        Self {
            name,
            runtime,
            config,
            status: RwLock::new(NodeStatus::default()),
        }
    }

    pub fn name(&self) -> &NodeName {
        &self.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.status.read().unwrap_or_else(PoisonError::into_inner).state
    }

    /// Current address (empty until discovered).
    pub fn address(&self) -> String {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .address
            .clone()
    }

    /// Returns true while the node is running.
    pub fn is_live(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    fn set_state(&self, next: LifecycleState) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        if next == LifecycleState::Absent {
            return;
        }
        status.state = next;
        if next != LifecycleState::Running {
            status.address.clear();
        }
    }

    /// Records a discovered address; ignored unless the node is running.
    fn set_address(&self, address: String) -> bool {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        if status.state != LifecycleState::Running {
            return false;
        }
        status.address = address;
        true
    }

    /// Runs a runtime call under the configured ceiling.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, EnvError>>,
    ) -> Result<T, EnvError> {
        let limit = self.config.call_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(EnvError::timeout(limit)),
        }
    }

    /// Brings the node up and discovers its address.
    ///
    /// A node that is already running is adopted as-is. Any failure
    /// leaves the handle in `Failed`; the caller carries on with the
    /// remaining nodes.
    pub async fn start(&self) -> Result<(), CoreError> {
        let report = match self.bounded(self.runtime.query_state(&self.name)).await {
            Ok(report) => report,
            Err(e) => {
                error!(node = %self.name, error = %e, "node does not exist, create it and retry");
                self.set_state(LifecycleState::Failed);
                return Err(CoreError::NodeMissing(self.name.clone()));
            }
        };

        if RuntimeState::parse(&report) == RuntimeState::Running {
            info!(node = %self.name, "already running");
        } else {
            self.set_state(LifecycleState::Starting);

            if let Err(e) = self.bounded(self.runtime.start(&self.name)).await {
                error!(node = %self.name, error = %e, "could not start");
                self.set_state(LifecycleState::Failed);
                return Err(CoreError::StartFailed {
                    node: self.name.clone(),
                    source: e,
                });
            }

            if let Some(timeout) = self.config.readiness_timeout {
                let wait = self
                    .runtime
                    .wait_for_state(&self.name, RuntimeState::Running, timeout);
                let waited = match tokio::time::timeout(timeout + self.config.call_timeout, wait).await {
                    Ok(result) => result,
                    Err(_) => Err(EnvError::timeout(timeout)),
                };
                if let Err(e) = waited {
                    error!(
                        node = %self.name,
                        timeout_secs = timeout.as_secs(),
                        "did not reach RUNNING, retry with a longer timeout"
                    );
                    self.set_state(LifecycleState::Failed);
                    return Err(CoreError::NotReady {
                        node: self.name.clone(),
                        source: e,
                    });
                }
            }
            info!(node = %self.name, "started");
        }

        self.set_state(LifecycleState::Running);
        self.discover_address().await;
        Ok(())
    }

    /// Polls the runtime for the node's address within the retry budget.
    ///
    /// Returns the address on success. Exhausting the budget leaves the
    /// node running without an address and logs a single error.
    pub async fn discover_address(&self) -> Option<String> {
        let policy = self.config.discovery;

        for attempt in 1..=policy.attempts {
            match self.bounded(self.runtime.discover_address(&self.name)).await {
                Ok(report) => match parse_address(&report) {
                    Some(address) => {
                        if !self.set_address(address.clone()) {
                            return None;
                        }
                        info!(node = %self.name, %address, attempt, "address discovered");
                        return Some(address);
                    }
                    None => debug!(node = %self.name, attempt, "no address reported yet"),
                },
                Err(e) => debug!(node = %self.name, attempt, error = %e, "address query failed"),
            }

            if attempt < policy.attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }

        error!(
            node = %self.name,
            attempts = policy.attempts,
            "could not find address, node will not be reachable"
        );
        None
    }

    /// Stops the node. Best effort: failures are logged, never returned.
    pub async fn stop(&self) {
        self.set_state(LifecycleState::Stopping);

        match self.bounded(self.runtime.stop(&self.name)).await {
            Err(e) => error!(node = %self.name, error = %e, "failed to stop"),
            Ok(()) => {
                if let Some(timeout) = self.config.stop_timeout {
                    let wait = self
                        .runtime
                        .wait_for_state(&self.name, RuntimeState::Stopped, timeout);
                    let waited = match tokio::time::timeout(timeout + self.config.call_timeout, wait).await {
                        Ok(result) => result,
                        Err(_) => Err(EnvError::timeout(timeout)),
                    };
                    if let Err(e) = waited {
                        warn!(node = %self.name, error = %e, "did not reach STOPPED");
                    }
                }
            }
        }

        self.set_state(LifecycleState::Stopped);
        info!(node = %self.name, "stopped");
    }

    /// Runs a reachability check from inside this node toward `target`.
    ///
    /// Returns the raw check output. An empty target, a failed attach or
    /// a hung runtime all yield an empty string, which never matches the
    /// success code.
    pub async fn execute_probe(&self, target: &str) -> String {
        if target.is_empty() {
            return String::new();
        }

        let check = self
            .runtime
            .exec_remote_check(&self.name, target, self.config.check_timeout);
        match self.bounded(check).await {
            Ok(code) => code,
            Err(e) => {
                warn!(node = %self.name, %target, error = %e, "could not attach");
                String::new()
            }
        }
    }
}

/// Extracts the first IPv4 address from a runtime network report.
///
/// Expects lines of the form `IP:   10.0.3.15`; anything else is ignored.
pub fn parse_address(report: &str) -> Option<String> {
    report
        .lines()
        .filter_map(|line| line.trim().strip_prefix("IP:"))
        .filter_map(|value| value.trim().parse::<Ipv4Addr>().ok())
        .map(|ip| ip.to_string())
        .next()
}
