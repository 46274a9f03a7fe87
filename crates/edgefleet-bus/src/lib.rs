//! edgefleet-bus — process-internal module bus.
//!
//! Every manager is a named module with one inbox. Requests are
//! [`Message`]s routed by destination name; inside a module the handler is
//! picked by `(Operation, resource)` from a [`HandlerTable`].
//!
//! # Architecture
//!
//! ```text
//! caller ──call()──▶ ModuleBus::send_sync(msg, timeout)
//!                      ├── pending[msg.id] = oneshot
//!                      └── modules[destination].send(msg)
//!                                │
//!                 run_module ◀───┘  (select! inbox vs shutdown)
//!                   └── spawn per message
//!                         ├── HandlerTable[(op, resource)](msg) → RespMsg
//!                         └── is_sync → bus.send(msg.reply(resp))
//!                                         └── pending[parent_id] → caller
//! ```
//!
//! Per destination, messages are delivered in acceptance order. A timed-out
//! caller gets [`BusError::Timeout`]; the handler still runs to completion and
//! its late reply is dropped.

pub mod bus;
pub mod client;
pub mod error;
pub mod handler;
pub mod message;
pub mod routes;

pub use bus::{Mailbox, ModuleBus};
pub use client::{call, call_resp, notify};
pub use error::{BusError, BusResult};
pub use handler::{Handler, HandlerTable, dispatch, run_module};
pub use message::{Header, Message, Operation, Router};
pub use routes::modules;
