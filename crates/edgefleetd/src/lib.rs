//! edgefleetd — the EdgeFleet control plane, assembled.
//!
//! # Architecture
//!
//! ```text
//! StateStore, ClusterFacade, ModuleBus
//!        │
//!        ├──► "NodeManager" ◄──────► "AppManager"     (bus calls only)
//!        ├──► "ConfigManager" ──┐
//!        ├──► "SoftwareManager" │
//!        └──► "EdgeInstaller" ──┴──► "EdgeConnector" ──► edge agents
//! ```
//!
//! Startup order: store, cluster facade, bus, edge link, managers, module
//! receive loops, node informer, app informer, token check. Shutdown
//! flips one watch channel and joins the tasks in reverse.

pub mod edge_link;
pub mod fleet;

pub use edge_link::EdgeLink;
pub use fleet::Fleet;
