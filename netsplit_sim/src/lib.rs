//! netsplit Simulation Harness
//!
//! An in-process stand-in for the LXC host, so the whole daemon (node
//! lifecycle, all-pairs probing, viewer fan-out) runs without containers.
//!
//! # Fault injection
//!
//! - **Partitions**: two node groups that cannot reach each other
//! - **Loss**: per-link (or default) probability that a check fails,
//!   rolled from a seeded ChaCha8 RNG so runs are repeatable
//! - **Latency**: per-link delay; above the check timeout the check fails
//!
//! # Usage
//!
//! ```ignore
//! use netsplit_env::{LinkController, NodeName};
//! use netsplit_sim::SimRuntime;
//!
//! let runtime = SimRuntime::new(42).with_nodes("n", 5);
//! runtime
//!     .links()
//!     .partition(&[NodeName::from("n0")], &[NodeName::from("n1")]);
//! ```

mod network;
mod runtime;

pub use network::{parse_partition, PartitionParseError, SimLinkController};
pub use runtime::SimRuntime;
