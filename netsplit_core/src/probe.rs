//! Probe request/result messages passed between scheduler, workers and
//! the broadcaster.

use netsplit_env::NodeName;
use serde::Serialize;

/// One reachability check to run from a node's worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// Address to check reachability of (may be empty for an
    /// address-less node, which fails deterministically)
    pub target: String,
}

impl ProbeRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

/// Message on a worker's private queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCommand {
    Probe(ProbeRequest),
    /// Terminates the worker
    Close,
}

/// Outcome of one probe, emitted exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    /// Node the check ran from
    pub source: NodeName,

    /// Node owning the target address at completion time (None when no
    /// live node owns it)
    pub dest: Option<NodeName>,

    /// True iff the check returned the success code
    pub success: bool,

    /// Operator-facing description, never sent to viewers
    #[serde(skip)]
    pub summary: String,
}

impl ProbeResult {
    /// Builds a result and its operator summary.
    pub fn new(source: NodeName, target: &str, dest: Option<NodeName>, success: bool) -> Self {
        let summary = format!("curl {target} from {source} {success}");
        Self {
            source,
            dest,
            success,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_mentions_target_and_source() {
        let result = ProbeResult::new(NodeName::from("n0"), "10.0.0.3", Some(NodeName::from("n1")), true);
        assert_eq!(result.summary, "curl 10.0.0.3 from n0 true");
    }

    #[test]
    fn test_summary_is_not_serialized() {
        let result = ProbeResult::new(NodeName::from("n1"), "10.0.0.2", None, false);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["source"], "n1");
        assert!(json["dest"].is_null());
        assert!(json.get("summary").is_none());
    }
}
