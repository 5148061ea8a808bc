//! Error types for the netsplit engine.

use netsplit_env::{EnvError, NodeName};
use thiserror::Error;

/// Errors surfaced by node lifecycle, the broadcaster and the viewer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The runtime has no such node; create it and retry
    #[error("{0} does not exist, create it and retry")]
    NodeMissing(NodeName),

    /// The runtime refused to start the node
    #[error("could not start {node}: {source}")]
    StartFailed {
        node: NodeName,
        #[source]
        source: EnvError,
    },

    /// The node started but never reported RUNNING
    #[error("{node} did not reach RUNNING: {source}")]
    NotReady {
        node: NodeName,
        #[source]
        source: EnvError,
    },

    /// The wire-protocol listener could not be bound
    #[error("could not open tcp socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The viewer gave up reaching the daemon
    #[error("could not reach daemon at {addr} after {attempts} attempts: {source}")]
    Unreachable {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
