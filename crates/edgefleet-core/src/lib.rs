//! edgefleet-core — shared vocabulary for the EdgeFleet control plane.
//!
//! # Architecture
//!
//! ```text
//! config     edgefleet.toml sections (storage, bus, cluster, labels, limits, ...)
//! inner      request/response bodies of inter-module calls
//! validate   field formats, bounds, batch checks
//! quantity   Quantity / ResourceList arithmetic in milli-units
//! labels     group and application label keys shared with edge agents
//! page       ListRequest → PageQuery, Page<T>
//! response   ErrorCode, RespMsg, BatchResp
//! time       epoch seconds and `YYYY-MM-DD HH:MM:SS` timestamps
//! ```

pub mod config;
pub mod inner;
pub mod labels;
pub mod page;
pub mod quantity;
pub mod response;
pub mod time;
pub mod validate;

pub use config::FleetConfig;
pub use page::{ListRequest, Page, PageQuery};
pub use quantity::{Quantity, ResourceList};
pub use response::{BatchResp, Coded, ErrorCode, RespMsg};
pub use validate::{Field, ValidationError, Validator};
