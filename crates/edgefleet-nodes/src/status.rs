//! Node status as derived from the cluster's `Ready` condition.

use std::fmt;

use edgefleet_cluster::ClusterNode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    Ready,
    NotReady,
    Unknown,
    Offline,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 4] = [
        NodeStatus::Ready,
        NodeStatus::NotReady,
        NodeStatus::Offline,
        NodeStatus::Unknown,
    ];

    /// `True → ready`, `False → notReady`, anything else → unknown, and a
    /// node without a `Ready` condition is offline.
    pub fn of(node: &ClusterNode) -> NodeStatus {
        match node.ready_condition() {
            Some("True") => NodeStatus::Ready,
            Some("False") => NodeStatus::NotReady,
            Some(_) => NodeStatus::Unknown,
            None => NodeStatus::Offline,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Ready => "ready",
            NodeStatus::NotReady => "notReady",
            NodeStatus::Unknown => "unknown",
            NodeStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> NodeStatus {
        match s {
            "ready" => NodeStatus::Ready,
            "notReady" => NodeStatus::NotReady,
            "offline" => NodeStatus::Offline,
            _ => NodeStatus::Unknown,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_ready_condition() {
        assert_eq!(NodeStatus::of(&ClusterNode::new("a").with_ready("True")), NodeStatus::Ready);
        assert_eq!(NodeStatus::of(&ClusterNode::new("a").with_ready("False")), NodeStatus::NotReady);
        assert_eq!(NodeStatus::of(&ClusterNode::new("a").with_ready("Unknown")), NodeStatus::Unknown);
        assert_eq!(NodeStatus::of(&ClusterNode::new("a")), NodeStatus::Offline);
    }

    #[test]
    fn wire_names() {
        assert_eq!(serde_json::to_value(NodeStatus::NotReady).unwrap(), "notReady");
        for status in NodeStatus::ALL {
            assert_eq!(NodeStatus::parse(status.as_str()), status);
        }
    }
}
