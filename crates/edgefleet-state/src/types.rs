//! Row types for every table.
//!
//! JSON-valued columns that carry domain structure the store does not
//! interpret (`containers`, `container_info`, `configmap_content`,
//! `software_info`, software values) are kept as strings.

use edgefleet_core::ResourceList;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: u64,
    pub node_name: String,
    pub unique_name: String,
    pub serial_number: String,
    pub ip_address: String,
    pub description: String,
    pub is_managed: bool,
    pub software_info: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewNode {
    pub node_name: String,
    pub unique_name: String,
    pub serial_number: String,
    pub ip_address: String,
    pub description: String,
    pub is_managed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    pub id: u64,
    pub group_name: String,
    pub description: String,
    pub resources_request: ResourceList,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRelation {
    pub group_id: u64,
    pub node_id: u64,
    pub created_at: String,
}

/// Application definition; templates share the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub id: u64,
    pub app_name: String,
    pub description: String,
    pub containers: String,
    pub created_at: String,
    pub modified_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDaemonSet {
    pub id: u64,
    pub daemon_set_name: String,
    pub app_id: u64,
    pub node_group_id: u64,
    pub node_group_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDaemonSet {
    pub daemon_set_name: String,
    pub app_id: u64,
    pub node_group_id: u64,
    pub node_group_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInstance {
    pub id: u64,
    pub pod_name: String,
    pub node_unique_name: String,
    pub node_id: u64,
    pub node_name: String,
    pub node_group_id: u64,
    pub app_name: String,
    pub app_id: u64,
    pub container_info: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Instance fields written by the pod watch; the store assigns the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub pod_name: String,
    pub node_unique_name: String,
    pub node_id: u64,
    pub node_name: String,
    pub node_group_id: u64,
    pub app_name: String,
    pub app_id: u64,
    pub container_info: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigmapInfo {
    pub configmap_id: u64,
    pub configmap_name: String,
    pub description: String,
    pub configmap_content: String,
    pub created_at: String,
    pub updated_at: String,
}

/// The single bootstrap token: PBKDF2 hash, salt, expiry in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub token: Vec<u8>,
    pub salt: Vec<u8>,
    pub expire_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareRecord {
    pub key: String,
    pub value: String,
    pub created_at: String,
    pub updated_at: String,
}
