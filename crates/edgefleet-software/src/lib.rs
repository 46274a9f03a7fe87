//! edgefleet-software — software manager and edge installer.
//!
//! # Architecture
//!
//! ```text
//! ModuleBus ── "SoftwareManager" ──► SoftwareManager ──► StateStore (software_infos)
//!                                       │  "auth_info": AES-256-GCM sealed credential
//!                                       │  "<type>": URL list, newest first, capped
//!                                       └─ download tickets signed with HMAC-SHA256
//!
//! ModuleBus ── "EdgeInstaller" ──► EdgeInstaller
//!                                     ├──► "SoftwareManager" (ticket)
//!                                     ├──► "NodeManager" (node serial numbers)
//!                                     ├──► "ConfigManager" (token)
//!                                     └──► "EdgeConnector" (one message per node)
//! ```
//!
//! Sealing and signing keys come from one key file, created on first start.

pub mod cipher;
pub mod error;
pub mod installer;
pub mod manager;
pub mod module;
pub mod urls;

pub use cipher::CredentialCipher;
pub use error::{SoftwareError, SoftwareResult};
pub use installer::{EdgeInstaller, UpgradeReq};
pub use manager::{AuthInfoReq, SoftwareManager};
pub use module::{installer_handlers, software_handlers};
pub use urls::{SoftwareTypeReq, SoftwareUrl, UrlListReq};
