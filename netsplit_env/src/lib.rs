//! netsplit Environment Abstraction Layer
//!
//! This crate provides the seam between the netsplit engine and the
//! runtime that actually hosts the nodes. The engine only ever talks to a
//! [`NodeRuntime`], so the same orchestration code drives:
//! - **Production**: `LxcRuntime` - shells out to `sudo lxc-*`
//! - **Simulation**: `SimRuntime` (in `netsplit_sim`) - in-process links
//!
//! # Example
//!
//! ```ignore
//! use netsplit_env::{LxcRuntime, NodeName, NodeRuntime};
//!
//! async fn check<R: NodeRuntime>(runtime: &R) {
//!     let n0 = NodeName::indexed("n", 0);
//!     let code = runtime
//!         .exec_remote_check(&n0, "10.0.3.12", Duration::from_secs(1))
//!         .await;
//! }
//! ```

mod error;
mod lxc_impl;
mod network;
mod runtime;
mod types;

pub use error::EnvError;
pub use lxc_impl::LxcRuntime;
pub use network::LinkController;
pub use runtime::NodeRuntime;
pub use types::{index_of, NodeName, RuntimeState};
