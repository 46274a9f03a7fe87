//! edgefleet-state — storage facade for the EdgeFleet control plane.
//!
//! Backed by [rusqlite](https://docs.rs/rusqlite) over a single SQLite file
//! (or an in-memory database for tests).
//!
//! # Architecture
//!
//! ```text
//! StateStore ── run(|db| ..)          autocommit
//!            └─ transaction(|db| ..)  all-or-nothing
//!                  │
//!                  ▼
//!                 Db ── nodes.rs     node_infos, node_groups, node_relations
//!                    ├─ apps.rs      app_infos, app_templates, app_daemon_sets, app_instances
//!                    └─ settings.rs  configmap_infos, token_infos, software_infos
//! ```
//!
//! The store knows nothing of business rules beyond the table constraints:
//! unique names, relation cascades, and daemon-set foreign keys.

pub mod apps;
pub mod error;
pub mod nodes;
pub mod schema;
pub mod settings;
pub mod store;
pub mod types;

pub use apps::AppTable;
pub use error::{StateError, StateResult};
pub use store::{Db, StateStore};
pub use types::*;
