//! Simulated links with fault injection.

use netsplit_env::{LinkController, NodeName};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Invalid `--partition` argument.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionParseError {
    #[error("partition must look like `a,b/c,d`, got `{0}`")]
    Shape(String),

    #[error("partition group is empty in `{0}`")]
    EmptyGroup(String),
}

/// Parses `n0,n1/n2` into the two sides of a partition.
pub fn parse_partition(arg: &str) -> Result<(Vec<NodeName>, Vec<NodeName>), PartitionParseError> {
    let (left, right) = arg
        .split_once('/')
        .ok_or_else(|| PartitionParseError::Shape(arg.to_string()))?;
    if right.contains('/') {
        return Err(PartitionParseError::Shape(arg.to_string()));
    }

    let group = |side: &str| -> Result<Vec<NodeName>, PartitionParseError> {
        let names: Vec<NodeName> = side
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(NodeName::from)
            .collect();
        if names.is_empty() {
            return Err(PartitionParseError::EmptyGroup(arg.to_string()));
        }
        Ok(names)
    };

    Ok((group(left)?, group(right)?))
}

/// Link state shared by every simulated node.
pub struct SimLinkController {
    /// Per-link latency in milliseconds
    link_latency: Mutex<HashMap<(NodeName, NodeName), u64>>,

    /// Per-link loss rate (0.0 - 1.0)
    link_loss: Mutex<HashMap<(NodeName, NodeName), f64>>,

    /// Loss applied to links without their own entry
    default_loss: Mutex<f64>,

    /// Active partitions (nodes that cannot communicate)
    partitions: Mutex<Vec<(Vec<NodeName>, Vec<NodeName>)>>,

    rng: Mutex<ChaCha8Rng>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimLinkController {
    /// Creates a controller whose loss rolls are driven by `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            link_latency: Mutex::new(HashMap::new()),
            link_loss: Mutex::new(HashMap::new()),
            default_loss: Mutex::new(0.0),
            partitions: Mutex::new(Vec::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Sets the loss rate for every link without an explicit one.
    pub fn set_default_loss(&self, loss_rate: f64) {
        *lock(&self.default_loss) = loss_rate.clamp(0.0, 1.0);
    }

    /// Gets the latency for a link (default 0).
    pub fn latency(&self, from: &NodeName, to: &NodeName) -> u64 {
        lock(&self.link_latency)
            .get(&(from.clone(), to.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Gets the loss rate for a link.
    pub fn loss(&self, from: &NodeName, to: &NodeName) -> f64 {
        lock(&self.link_loss)
            .get(&(from.clone(), to.clone()))
            .copied()
            .unwrap_or_else(|| *lock(&self.default_loss))
    }

    /// Rolls whether one request over `from -> to` gets through loss.
    pub fn roll_delivery(&self, from: &NodeName, to: &NodeName) -> bool {
        let loss = self.loss(from, to);
        if loss <= 0.0 {
            return true;
        }
        lock(&self.rng).gen::<f64>() >= loss
    }
}

impl Default for SimLinkController {
    fn default() -> Self {
        Self::new(42)
    }
}

impl LinkController for SimLinkController {
    fn partition(&self, group_a: &[NodeName], group_b: &[NodeName]) {
        lock(&self.partitions).push((group_a.to_vec(), group_b.to_vec()));
    }

    fn heal_all(&self) {
        lock(&self.partitions).clear();
    }

    fn set_link_latency(&self, from: &NodeName, to: &NodeName, latency_ms: u64) {
        lock(&self.link_latency).insert((from.clone(), to.clone()), latency_ms);
    }

    fn set_link_loss(&self, from: &NodeName, to: &NodeName, loss_rate: f64) {
        lock(&self.link_loss).insert((from.clone(), to.clone()), loss_rate.clamp(0.0, 1.0));
    }

    fn can_reach(&self, from: &NodeName, to: &NodeName) -> bool {
        let partitions = lock(&self.partitions);
        !partitions.iter().any(|(a, b)| {
            (a.contains(from) && b.contains(to)) || (b.contains(from) && a.contains(to))
        })
    }
}
