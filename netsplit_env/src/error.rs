//! Error types for the netsplit environment abstraction.

use thiserror::Error;

/// Errors that can occur while talking to the node runtime.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The runtime command could not be spawned at all
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The runtime command ran but reported failure
    #[error("`{command}` exited with {status}")]
    CommandFailed { command: String, status: String },

    /// The runtime has no node with this name
    #[error("Node does not exist: {0}")]
    NodeMissing(String),

    /// The runtime answered with text we could not interpret
    #[error("Malformed runtime output: {0}")]
    MalformedOutput(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a command failure error.
    pub fn command_failed(command: impl Into<String>, status: impl std::fmt::Display) -> Self {
        Self::CommandFailed {
            command: command.into(),
            status: status.to_string(),
        }
    }

    /// Creates a missing-node error.
    pub fn missing(node: impl std::fmt::Display) -> Self {
        Self::NodeMissing(node.to_string())
    }

    /// Creates a timeout error from a duration.
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout(after.as_millis() as u64)
    }
}
