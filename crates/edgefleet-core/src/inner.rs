//! Bodies of the `/inner/...` calls modules make to each other.
//!
//! Managers never link against each other; both sides of a call agree on
//! these shapes instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::quantity::ResourceList;

// ── Served by the node manager ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueNameReq {
    pub unique_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdReq {
    pub node_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    pub node_id: u64,
    pub node_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusResp {
    pub node_status: String,
}

/// The node fields other modules need; decodes from a full node row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub id: u64,
    pub node_name: String,
    pub unique_name: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub is_managed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupIdReq {
    pub group_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupIdsReq {
    pub group_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNodesResp {
    pub node_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRef {
    pub group_id: u64,
    pub group_name: String,
}

/// Admission check: every member of the group must have `resources` free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckGroupResourcesReq {
    pub group_id: u64,
    pub resources: ResourceList,
}

/// Per-pod `resources` added to (or removed from) the group accumulator;
/// the node manager scales them by the current member count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupResourcesReq {
    pub group_id: u64,
    pub resources: ResourceList,
    pub is_undeploy: bool,
}

/// Installed software reported by an edge agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareReport {
    pub serial_number: String,
    pub software_info: Vec<serde_json::Value>,
}

// ── Served by the app manager ──────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAppCount {
    pub daemon_sets: u64,
    pub instances: u64,
}

pub type GroupAppCounts = BTreeMap<u64, GroupAppCount>;

// ── Served by the config manager ───────────────────────────────────

/// Nodes that joined or left the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeChanged {
    pub added: Vec<NodeSummary>,
    pub deleted: Vec<NodeSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertUpdate {
    pub cert_name: String,
    pub cert_content: String,
    /// Operation the edge applies, e.g. `update` or `delete`.
    #[serde(default = "default_cert_opt")]
    pub cert_opt: String,
}

fn default_cert_opt() -> String {
    "update".to_string()
}

/// Certificate pushed to one edge node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertDownload {
    pub cert_name: String,
    pub cert_content: String,
    pub cert_opt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_address: Option<String>,
}

/// Stored token hash and salt, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResp {
    pub token: String,
    pub salt: String,
    pub expire_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTokenReq {
    pub token: String,
}

// ── Served by the software manager ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketReq {
    pub software_type: String,
}

/// Everything an edge agent needs to fetch one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTicket {
    pub software_type: String,
    pub url: String,
    pub version: String,
    pub username: String,
    pub password: String,
    pub expire_at: u64,
    /// Hex HMAC-SHA256 over the other fields.
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_summary_decodes_from_wider_row() {
        let row = serde_json::json!({
            "id": 3,
            "nodeName": "edge-01",
            "uniqueName": "edge-01",
            "serialNumber": "SN1",
            "ipAddress": "10.0.0.3",
            "description": "",
            "isManaged": true,
            "softwareInfo": "",
            "createdAt": "2024-01-01 00:00:00",
            "updatedAt": "2024-01-01 00:00:00"
        });
        let node: NodeSummary = serde_json::from_value(row).unwrap();
        assert_eq!(node.id, 3);
        assert_eq!(node.serial_number, "SN1");
    }

    #[test]
    fn group_counts_use_string_keys_on_the_wire() {
        let counts = GroupAppCounts::from([(7, GroupAppCount { daemon_sets: 1, instances: 2 })]);
        let json = serde_json::to_value(&counts).unwrap();
        assert_eq!(json["7"]["daemonSets"], 1);
        let back: GroupAppCounts = serde_json::from_value(json).unwrap();
        assert_eq!(back, counts);
    }
}
