//! Common types for the netsplit environment abstraction.

use serde::{Deserialize, Serialize};

/// Name of one node under orchestration.
///
/// Nodes are named with a fixed prefix plus a zero-based decimal index
/// (`n0`, `n1`, ...). Viewers rely on the numeric suffix to place a node
/// on the connectivity grid, so names never contain whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    /// Default prefix used for generated node names.
    pub const DEFAULT_PREFIX: &'static str = "n";

    /// Creates a node name from raw text.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates the conventional name for the node at `index`.
    pub fn indexed(prefix: &str, index: usize) -> Self {
        Self(format!("{prefix}{index}"))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the grid index encoded in the name's numeric suffix.
    pub fn index(&self) -> Option<usize> {
        index_of(&self.0)
    }
}

impl std::fmt::Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Parses the trailing decimal digits of a node name (`n3` -> 3).
///
/// Returns `None` when the name has no numeric suffix.
pub fn index_of(name: &str) -> Option<usize> {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &name[stem.len()..];
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Lifecycle state as reported by the runtime itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeState {
    Running,
    Stopped,
    Starting,
    Stopping,
    /// Anything else the runtime reports (FROZEN, ABORTING, ...)
    Other(String),
}

impl RuntimeState {
    /// Interprets a runtime state report such as `State:   RUNNING`.
    ///
    /// Only the text after the last colon is considered.
    pub fn parse(report: &str) -> Self {
        let token = report
            .split(':')
            .next_back()
            .unwrap_or_default()
            .trim()
            .to_ascii_uppercase();
        match token.as_str() {
            "RUNNING" => Self::Running,
            "STOPPED" => Self::Stopped,
            "STARTING" => Self::Starting,
            "STOPPING" => Self::Stopping,
            _ => Self::Other(token),
        }
    }

    /// The spelling used on the runtime's command line.
    pub fn as_runtime_str(&self) -> &str {
        match self {
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Stopping => "STOPPING",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_runtime_str())
    }
}
