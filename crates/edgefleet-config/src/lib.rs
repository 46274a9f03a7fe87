//! edgefleet-config — image registry credentials, certificate distribution
//! and the enrolment token.
//!
//! # Architecture
//!
//! ```text
//! ModuleBus ── "ConfigManager" ──► ConfigManager
//!                                     │  registry: pull secret (docker-config JSON)
//!                                     │  certs: latest content per certificate name
//!                                     │  token: PBKDF2-SHA256 hash + salt, one row
//!                                     ├──► ClusterFacade (pull secret)
//!                                     ├──► "NodeManager" (all nodes)
//!                                     └──► "EdgeConnector" (one cert message per node)
//! ```

pub mod error;
pub mod manager;
pub mod module;
pub mod registry;
pub mod token;

pub use error::{ConfigError, ConfigResult};
pub use manager::ConfigManager;
pub use module::handlers;
pub use registry::ImageConfigReq;
