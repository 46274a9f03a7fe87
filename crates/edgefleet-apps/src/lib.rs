//! edgefleet-apps — app-status informer and app manager.
//!
//! # Architecture
//!
//! ```text
//! ClusterFacade::watch_workloads ──► AppInformer ──► app_daemon_sets, group accumulators
//! ClusterFacade::watch_pods ───────►     │       ──► app_instances
//!                                        │  cache: pod phase, container states
//!                                        ▼
//! ModuleBus ── "AppManager" ──► AppManager ──► StateStore
//!                                   │   apps, templates, configmaps
//!                                   ├──► ClusterFacade (workloads, configmaps)
//!                                   └──► "NodeManager" (group admission and charges)
//! ```
//!
//! Every deployed workload is `<appName>-<groupId>`, selects the nodes
//! carrying the group label, and charges the group accumulator with its
//! per-pod limits times the group's member count.

pub mod catalog;
pub mod container;
pub mod error;
pub mod informer;
pub mod manager;
pub mod module;
pub mod types;

pub use container::{Container, WorkloadBuilder};
pub use error::{AppError, AppResult};
pub use informer::AppInformer;
pub use manager::AppManager;
pub use module::handlers;
pub use types::*;

#[cfg(test)]
pub(crate) mod testing;
