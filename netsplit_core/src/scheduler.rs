//! MatrixScheduler - submits one all-pairs probe sweep per period.

use netsplit_env::{NodeName, NodeRuntime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::metrics::ProbeCounters;
use crate::probe::{ProbeCommand, ProbeRequest};
use crate::registry::NodeSet;
use crate::worker::ProbeQueues;

/// Configuration for the sweep cadence.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between the starts of consecutive sweeps
    pub period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(4),
        }
    }
}

/// Outcome of submitting one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub submitted: usize,
    pub dropped: usize,
}

/// Plans one sweep: an (source, request) pair for every ordered pair of
/// nodes, self-pairs included. Source iterates outer.
pub fn plan_cycle(live: &[(NodeName, String)]) -> Vec<(NodeName, ProbeRequest)> {
    live.iter()
        .flat_map(|(source, _)| {
            live.iter()
                .map(move |(_, address)| (source.clone(), ProbeRequest::new(address.clone())))
        })
        .collect()
}

/// Periodically enqueues an N×N sweep over the live nodes.
///
/// Sweeps are never joined: a new one starts on schedule even if the
/// previous one is still being worked off. Submission never blocks; a
/// request that does not fit its worker's queue is dropped and counted.
pub struct MatrixScheduler<R: NodeRuntime> {
    nodes: Arc<NodeSet<R>>,
    queues: ProbeQueues,
    config: SchedulerConfig,
    counters: Arc<ProbeCounters>,
}

impl<R: NodeRuntime> MatrixScheduler<R> {
    pub fn new(
        nodes: Arc<NodeSet<R>>,
        queues: ProbeQueues,
        config: SchedulerConfig,
        counters: Arc<ProbeCounters>,
    ) -> Self {
        Self {
            nodes,
            queues,
            config,
            counters,
        }
    }

    /// Submits one sweep over the nodes that are live right now.
    pub fn run_cycle(&self) -> CycleReport {
        let live: Vec<(NodeName, String)> = self
            .nodes
            .live()
            .iter()
            .filter(|n| self.queues.contains_key(n.name()))
            .map(|n| (n.name().clone(), n.address()))
            .collect();

        let mut report = CycleReport::default();
        for (source, request) in plan_cycle(&live) {
            let Some(queue) = self.queues.get(&source) else {
                continue;
            };
            match queue.try_send(ProbeCommand::Probe(request)) {
                Ok(()) => {
                    report.submitted += 1;
                    self.counters.record_submitted();
                }
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    self.counters.record_dropped();
                }
                Err(TrySendError::Closed(_)) => {
                    report.dropped += 1;
                    self.counters.record_dropped();
                    debug!(node = %source, "worker queue closed");
                }
            }
        }

        if report.dropped > 0 {
            warn!(dropped = report.dropped, "worker queues full, probes dropped");
        }
        report
    }

    /// Runs sweeps forever on the configured period.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.run_cycle();
            let stats = self.counters.snapshot();
            debug!(
                submitted = report.submitted,
                dropped = report.dropped,
                total_succeeded = stats.succeeded,
                total_failed = stats.failed,
                in_flight = stats.in_flight(),
                "sweep submitted"
            );
        }
    }

    /// Asks every worker to stop after its queued requests.
    pub fn close(&self) {
        for queue in self.queues.values() {
            let _ = queue.try_send(ProbeCommand::Close);
        }
    }
}
