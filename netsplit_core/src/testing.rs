//! Scripted runtime and log capture shared by the unit tests.

use async_trait::async_trait;
use netsplit_env::{EnvError, NodeName, NodeRuntime, RuntimeState};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// In-memory runtime whose answers are scripted per test.
#[derive(Default)]
pub struct FakeRuntime {
    /// name -> address reported once the node is running
    addresses: HashMap<String, String>,
    running: Mutex<HashSet<String>>,
    failing_start: HashSet<String>,
    /// Number of malformed address reports before the real one
    malformed: usize,
    address_queries: Mutex<HashMap<String, usize>>,
    /// (source, target address) pairs that answer 200
    reachable: Mutex<HashSet<(String, String)>>,
    check_delay: Duration,
    start_delay: Duration,
    checks: Mutex<Vec<(String, String)>>,
    starts: Mutex<Vec<String>>,
    stops: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, name: &str, address: &str) -> Self {
        self.addresses.insert(name.to_string(), address.to_string());
        self
    }

    pub fn failing_start(mut self, name: &str) -> Self {
        self.failing_start.insert(name.to_string());
        self
    }

    pub fn malformed_reports(mut self, count: usize) -> Self {
        self.malformed = count;
        self
    }

    pub fn with_check_delay(mut self, delay: Duration) -> Self {
        self.check_delay = delay;
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn mark_running(&self, name: &str) {
        self.running.lock().unwrap().insert(name.to_string());
    }

    pub fn allow(&self, source: &str, target: &str) {
        self.reachable
            .lock()
            .unwrap()
            .insert((source.to_string(), target.to_string()));
    }

    pub fn address_queries(&self, name: &str) -> usize {
        *self.address_queries.lock().unwrap().get(name).unwrap_or(&0)
    }

    pub fn checks(&self) -> Vec<(String, String)> {
        self.checks.lock().unwrap().clone()
    }

    pub fn start_calls(&self) -> Vec<String> {
        self.starts.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> Vec<String> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeRuntime for FakeRuntime {
    async fn query_state(&self, node: &NodeName) -> Result<String, EnvError> {
        if !self.addresses.contains_key(node.as_str()) {
            return Err(EnvError::missing(node));
        }
        if self.running.lock().unwrap().contains(node.as_str()) {
            Ok("State:          RUNNING\n".to_string())
        } else {
            Ok("State:          STOPPED\n".to_string())
        }
    }

    async fn start(&self, node: &NodeName) -> Result<(), EnvError> {
        self.starts.lock().unwrap().push(node.to_string());
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.failing_start.contains(node.as_str()) {
            return Err(EnvError::command_failed("lxc-start", "exit status: 1"));
        }
        self.mark_running(node.as_str());
        Ok(())
    }

    async fn stop(&self, node: &NodeName) -> Result<(), EnvError> {
        self.stops.lock().unwrap().push(node.to_string());
        self.running.lock().unwrap().remove(node.as_str());
        Ok(())
    }

    async fn wait_for_state(
        &self,
        _node: &NodeName,
        _state: RuntimeState,
        _timeout: Duration,
    ) -> Result<(), EnvError> {
        Ok(())
    }

    async fn discover_address(&self, node: &NodeName) -> Result<String, EnvError> {
        let seen = {
            let mut queries = self.address_queries.lock().unwrap();
            let count = queries.entry(node.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if seen <= self.malformed {
            return Ok("IP: \n".to_string());
        }
        let address = self.addresses.get(node.as_str()).cloned().unwrap_or_default();
        Ok(format!("IP:             {address}\n"))
    }

    async fn exec_remote_check(
        &self,
        node: &NodeName,
        target: &str,
        _timeout: Duration,
    ) -> Result<String, EnvError> {
        self.checks
            .lock()
            .unwrap()
            .push((node.to_string(), target.to_string()));
        if !self.check_delay.is_zero() {
            tokio::time::sleep(self.check_delay).await;
        }
        let ok = self
            .reachable
            .lock()
            .unwrap()
            .contains(&(node.to_string(), target.to_string()));
        Ok(if ok { "200" } else { "000" }.to_string())
    }
}

struct ErrorCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Awaits `fut` on the current thread and counts ERROR events it logs.
pub async fn count_errors<F: Future>(fut: F) -> (usize, F::Output) {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(ErrorCounter(count.clone()));
    let _guard = tracing::subscriber::set_default(subscriber);
    let output = fut.await;
    (count.load(Ordering::SeqCst), output)
}
