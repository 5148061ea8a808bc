//! netsplit Core - Deliberate network failure lab for ephemeral nodes
//!
//! This library drives a small fleet of nodes through their lifecycle,
//! probes every ordered node pair on a fixed cadence, and fans the
//! outcomes out to live viewers:
//! 1. **Lifecycle**: `NodeHandle` start/discover/stop against a `NodeRuntime`
//! 2. **Probing**: one `ProbeWorker` per node fed by the `MatrixScheduler`
//! 3. **Fan-out**: `ResultBroadcaster` streams results as text lines
//!
//! ```text
//! MatrixScheduler ──► per-node queue ──► ProbeWorker ──► ResultBroadcaster
//!                                                            │
//!                                          wire lines ◄──────┘
//!                                              │
//!                                     DashboardRenderer (viewer)
//! ```

pub mod broadcaster;
pub mod daemon;
pub mod error;
pub mod grid;
pub mod metrics;
pub mod node;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod viewer;
pub mod wire;
pub mod worker;

#[cfg(feature = "dashboard")]
pub mod dashboard;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use broadcaster::{Acceptor, BroadcastConfig, ResultBroadcaster, Session};
pub use daemon::{Daemon, DaemonConfig};
pub use error::CoreError;
pub use grid::{ConnectivityMatrix, GridLayout, MAX_GRID_NODES};
pub use metrics::{ProbeCounters, ProbeStats};
pub use node::{DiscoveryPolicy, LifecycleState, NodeConfig, NodeHandle};
pub use probe::{ProbeCommand, ProbeRequest, ProbeResult};
pub use registry::NodeSet;
pub use scheduler::{MatrixScheduler, SchedulerConfig};
pub use viewer::ViewerConfig;
pub use wire::StatusLine;
pub use worker::ProbeWorker;
