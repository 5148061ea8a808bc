//! Daemon - wires lifecycle, probing and fan-out into one process.

use netsplit_env::NodeRuntime;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::broadcaster::{self, Acceptor, BroadcastConfig, BroadcasterTasks};
use crate::error::CoreError;
use crate::metrics::{ProbeCounters, ProbeStats};
use crate::node::NodeConfig;
use crate::registry::NodeSet;
use crate::scheduler::{MatrixScheduler, SchedulerConfig};
use crate::worker::spawn_workers;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Number of nodes, named `<prefix>0..<prefix>N-1`
    pub node_count: usize,
    pub prefix: String,
    /// Capacity of each per-node request queue
    pub queue_capacity: usize,
    /// Address the wire-protocol listener binds to
    pub listen_addr: String,
    pub node: NodeConfig,
    pub scheduler: SchedulerConfig,
    pub broadcast: BroadcastConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_count: 5,
            prefix: netsplit_env::NodeName::DEFAULT_PREFIX.to_string(),
            queue_capacity: 25,
            listen_addr: "127.0.0.1:4001".to_string(),
            node: NodeConfig::default(),
            scheduler: SchedulerConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn with_nodes(mut self, count: usize) -> Self {
        self.node_count = count;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.scheduler.period = period;
        self
    }

    pub fn with_node_config(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }

    /// Upper bound on stopping one node during shutdown.
    pub fn stop_budget(&self) -> Duration {
        self.node.stop_timeout.unwrap_or_default() + self.node.call_timeout
    }
}

/// The control process: owns the node set and every background loop.
pub struct Daemon<R: NodeRuntime> {
    config: DaemonConfig,
    nodes: Arc<NodeSet<R>>,
    counters: Arc<ProbeCounters>,
    workers: Vec<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
    broadcaster: Option<BroadcasterTasks>,
}

impl<R: NodeRuntime> Daemon<R> {
    pub fn new(runtime: Arc<R>, config: DaemonConfig) -> Self {
        let nodes = Arc::new(NodeSet::new(
            runtime,
            &config.prefix,
            config.node_count,
            config.node.clone(),
        ));
        Self {
            config,
            nodes,
            counters: Arc::new(ProbeCounters::new()),
            workers: Vec::new(),
            scheduler: None,
            broadcaster: None,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn nodes(&self) -> &Arc<NodeSet<R>> {
        &self.nodes
    }

    pub fn counters(&self) -> &Arc<ProbeCounters> {
        &self.counters
    }

    /// Binds the wire-protocol listener.
    pub async fn bind(addr: &str) -> Result<TcpListener, CoreError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| CoreError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!(%addr, "listening for viewers");
        Ok(listener)
    }

    /// Starts every node; returns how many are live.
    pub async fn bring_up(&self) -> usize {
        self.nodes.start_all().await
    }

    /// Spawns the broadcaster, one worker per live node and the
    /// scheduler. Returns immediately.
    pub fn run<A: Acceptor>(&mut self, acceptor: A) {
        let (results_tx, results_rx) = mpsc::channel(self.config.broadcast.event_buffer.max(1));
        self.broadcaster = Some(broadcaster::spawn(
            acceptor,
            results_rx,
            self.config.broadcast.clone(),
        ));

        let (queues, workers) = spawn_workers(
            &self.nodes,
            self.config.queue_capacity,
            &results_tx,
            &self.counters,
        );
        self.workers = workers;

        let scheduler = MatrixScheduler::new(
            self.nodes.clone(),
            queues,
            self.config.scheduler.clone(),
            self.counters.clone(),
        );
        self.scheduler = Some(tokio::spawn(scheduler.run()));

        info!(
            workers = self.workers.len(),
            period_ms = self.config.scheduler.period.as_millis() as u64,
            "probing started"
        );
    }

    /// Stops the background loops, then every node. Never fails.
    pub async fn shutdown(mut self) -> ProbeStats {
        info!("shutting down");
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.abort();
        }
        for worker in self.workers.drain(..) {
            worker.abort();
        }
        if let Some(broadcaster) = self.broadcaster.take() {
            broadcaster.abort();
        }

        self.nodes.stop_all(self.config.stop_budget()).await;

        let stats = self.counters.snapshot();
        info!(
            submitted = stats.submitted,
            dropped = stats.dropped,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "probe totals"
        );
        stats
    }
}
