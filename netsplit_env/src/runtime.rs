//! Node runtime trait: the collaborator that creates, destroys and
//! execs into nodes.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::EnvError;
use crate::types::{NodeName, RuntimeState};

/// The central interface for node lifecycle and remote execution.
///
/// Every call is a synchronous, one-shot, side-effecting request to an
/// external process. None are assumed idempotent beyond "safe to retry
/// on failure". Calls for *different* nodes may run concurrently.
///
/// # Implementations
///
/// - **Production**: `LxcRuntime` - wraps `lxc-info`, `lxc-start`, ...
/// - **Simulation**: `SimRuntime` - in-process nodes with fault injection
#[async_trait]
pub trait NodeRuntime: Send + Sync + 'static {
    /// Returns the runtime's raw state report for `node`.
    ///
    /// Fails with `EnvError::NodeMissing` when the node does not exist.
    async fn query_state(&self, node: &NodeName) -> Result<String, EnvError>;

    /// Starts the node.
    async fn start(&self, node: &NodeName) -> Result<(), EnvError>;

    /// Stops the node.
    async fn stop(&self, node: &NodeName) -> Result<(), EnvError>;

    /// Blocks until the node reports `state`, or fails after `timeout`.
    async fn wait_for_state(
        &self,
        node: &NodeName,
        state: RuntimeState,
        timeout: Duration,
    ) -> Result<(), EnvError>;

    /// Returns the runtime's raw network report for `node`.
    ///
    /// The text may be empty or malformed while the node is still
    /// acquiring an address; callers parse and retry.
    async fn discover_address(&self, node: &NodeName) -> Result<String, EnvError>;

    /// Runs an HTTP reachability check from inside `node` toward `target`.
    ///
    /// # Returns
    /// * `Ok(code)` - The check ran; `code` is the raw HTTP status text
    ///   (`"200"`, `"000"` on connect failure, ...)
    /// * `Err(_)` - The runtime could not attach to the node
    ///
    /// `timeout` bounds the check itself, not the runtime invocation.
    async fn exec_remote_check(
        &self,
        node: &NodeName,
        target: &str,
        timeout: Duration,
    ) -> Result<String, EnvError>;
}
