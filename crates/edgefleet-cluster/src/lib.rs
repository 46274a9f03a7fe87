//! edgefleet-cluster — the cluster facade.
//!
//! The control plane never talks to a cluster client directly. Managers and
//! informers hold a [`ClusterFacade`], which wraps any [`ClusterApi`] backend
//! with the retry and not-found policy, and hands out watch sources.
//!
//! # Architecture
//!
//! ```text
//! ClusterFacade (Clone)
//!   ├── retry: idempotent ops on Transient/Conflict, creates on Transient only
//!   ├── deletes: NotFound → Ok(false)
//!   ├── node_allocated_resources() = Σ pod requests on the node
//!   ├── watch_nodes/pods/workloads() → Watch { initial, broadcast::Receiver }
//!   └── Arc<dyn ClusterApi>
//!         └── MemoryCluster (standalone + tests)
//!               ├── daemon-set controller: pod `<workload>-<node>` per match
//!               └── fault injection, terminating pods
//! ```

pub mod api;
pub mod error;
pub mod facade;
pub mod memory;
pub mod types;

pub use api::{ClusterApi, Watch};
pub use error::{ClusterError, ClusterResult};
pub use facade::ClusterFacade;
pub use memory::MemoryCluster;
pub use types::*;
