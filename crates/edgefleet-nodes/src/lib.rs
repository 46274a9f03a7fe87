//! edgefleet-nodes — node informer and node manager.
//!
//! # Architecture
//!
//! ```text
//! ClusterFacade::watch_nodes ──► NodeInformer ──► node_infos (unmanaged rows)
//!                                    │  cache: status, allocatable, available
//!                                    │  group labels ◄── node_relations
//!                                    ▼
//! ModuleBus ── "NodeManager" ──► NodeManager ──► StateStore
//!                                    │   nodes, node groups, relations,
//!                                    │   group accumulators
//!                                    └──► "AppManager" (pod resources, app counts)
//! ```
//!
//! The node informer reports joins and departures of nodes carrying a
//! serial number to the config manager.

pub mod error;
pub mod informer;
pub mod manager;
pub mod module;
pub mod status;
pub mod types;

pub use error::{NodeError, NodeResult};
pub use informer::NodeInformer;
pub use manager::NodeManager;
pub use module::handlers;
pub use status::NodeStatus;
pub use types::*;
