//! ProbeWorker - runs one node's reachability checks in queue order.

use netsplit_env::{NodeName, NodeRuntime};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::metrics::ProbeCounters;
use crate::node::NodeHandle;
use crate::probe::{ProbeCommand, ProbeResult};
use crate::registry::NodeSet;

/// Senders for every worker queue, keyed by source node.
pub type ProbeQueues = HashMap<NodeName, mpsc::Sender<ProbeCommand>>;

/// Worker owning one node's private request queue.
///
/// Requests are serviced strictly FIFO. A failed check is an ordinary
/// result, not an error: there is no retry at this layer.
pub struct ProbeWorker<R: NodeRuntime> {
    node: Arc<NodeHandle<R>>,
    nodes: Arc<NodeSet<R>>,
    requests: mpsc::Receiver<ProbeCommand>,
    results: mpsc::Sender<ProbeResult>,
    counters: Arc<ProbeCounters>,
}

impl<R: NodeRuntime> ProbeWorker<R> {
    /// Creates a worker and the bounded queue feeding it.
    pub fn new(
        node: Arc<NodeHandle<R>>,
        nodes: Arc<NodeSet<R>>,
        capacity: usize,
        results: mpsc::Sender<ProbeResult>,
        counters: Arc<ProbeCounters>,
    ) -> (Self, mpsc::Sender<ProbeCommand>) {
        let (tx, requests) = mpsc::channel(capacity.max(1));
        let worker = Self {
            node,
            nodes,
            requests,
            results,
            counters,
        };
        (worker, tx)
    }

    /// Services requests until `Close`, queue shutdown, or the
    /// broadcaster going away.
    pub async fn run(mut self) {
        while let Some(command) = self.requests.recv().await {
            let request = match command {
                ProbeCommand::Probe(request) => request,
                ProbeCommand::Close => break,
            };

            let code = self.node.execute_probe(&request.target).await;
            let success = code == self.node.config().success_code;
            // Resolve after the check so a concurrent restart is reflected.
            let dest = self.nodes.name_for_address(&request.target);
            self.counters.record_outcome(success);

            let result = ProbeResult::new(self.node.name().clone(), &request.target, dest, success);
            if self.results.send(result).await.is_err() {
                break;
            }
        }
        debug!(node = %self.node.name(), "probe worker finished");
    }
}

/// Spawns one worker per live node and returns their queues.
pub fn spawn_workers<R: NodeRuntime>(
    nodes: &Arc<NodeSet<R>>,
    capacity: usize,
    results: &mpsc::Sender<ProbeResult>,
    counters: &Arc<ProbeCounters>,
) -> (ProbeQueues, Vec<JoinHandle<()>>) {
    let mut queues = HashMap::new();
    let mut tasks = Vec::new();

    for node in nodes.live() {
        let name = node.name().clone();
        let (worker, tx) = ProbeWorker::new(
            node,
            nodes.clone(),
            capacity,
            results.clone(),
            counters.clone(),
        );
        tasks.push(tokio::spawn(worker.run()));
        queues.insert(name, tx);
    }

    (queues, tasks)
}
