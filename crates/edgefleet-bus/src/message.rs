//! Bus message envelope.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BusError, BusResult};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide monotonic message id. Zero is reserved for "no parent".
pub fn next_message_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "REPORT")]
    Report,
    #[serde(rename = "response")]
    Response,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Get => "GET",
            Operation::Post => "POST",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Report => "REPORT",
            Operation::Response => "response",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub id: u64,
    /// Id of the request this message answers, or 0.
    pub parent_id: u64,
    pub is_sync: bool,
    /// Unix milliseconds at creation.
    pub timestamp: i64,
    /// Edge node the message concerns, for messages bound to the edge link.
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Router {
    pub source: String,
    pub destination: String,
    pub operation: Operation,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: Header,
    pub router: Router,
    pub content: serde_json::Value,
}

impl Message {
    pub fn new(
        source: &str,
        destination: &str,
        operation: Operation,
        resource: &str,
        content: serde_json::Value,
    ) -> Self {
        Self {
            header: Header {
                id: next_message_id(),
                parent_id: 0,
                is_sync: false,
                timestamp: chrono::Utc::now().timestamp_millis(),
                node_id: String::new(),
            },
            router: Router {
                source: source.to_string(),
                destination: destination.to_string(),
                operation,
                resource: resource.to_string(),
            },
            content,
        }
    }

    /// Build a message whose content is `body` serialised to JSON.
    pub fn with_body<T: Serialize + ?Sized>(
        source: &str,
        destination: &str,
        operation: Operation,
        resource: &str,
        body: &T,
    ) -> BusResult<Self> {
        Ok(Self::new(
            source,
            destination,
            operation,
            resource,
            serde_json::to_value(body)?,
        ))
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.header.node_id = node_id.into();
        self
    }

    /// Response addressed back to the sender, correlated by `parent_id`.
    pub fn reply(&self, content: serde_json::Value) -> Message {
        let mut reply = Message::new(
            &self.router.destination,
            &self.router.source,
            Operation::Response,
            &self.router.resource,
            content,
        );
        reply.header.parent_id = self.header.id;
        reply.header.node_id = self.header.node_id.clone();
        reply
    }

    pub fn decode<T: DeserializeOwned>(&self) -> BusResult<T> {
        T::deserialize(&self.content).map_err(|e| {
            BusError::Codec(format!(
                "{} {}: {e}",
                self.router.operation, self.router.resource
            ))
        })
    }

    pub fn id(&self) -> u64 {
        self.header.id
    }

    pub fn is_reply(&self) -> bool {
        self.header.parent_id != 0
    }
}
