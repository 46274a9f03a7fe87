//! Request bodies and joined views served by the node manager.

use edgefleet_core::config::LabelsConfig;
use edgefleet_core::quantity::{CPU, MEMORY};
use edgefleet_core::{Quantity, ResourceList};
use edgefleet_state::{NodeGroup, NodeInfo};
use serde::{Deserialize, Serialize};

use crate::status::NodeStatus;

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeReq {
    pub node_name: String,
    pub unique_name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupReq {
    pub group_name: String,
    #[serde(default)]
    pub description: String,
}

/// Take an unmanaged node under management, optionally joining groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteNodeReq {
    pub node_id: u64,
    pub name: String,
    #[serde(default)]
    pub group_ids: Vec<u64>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRelationReq {
    pub group_id: u64,
    pub node_ids: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationPair {
    pub group_id: u64,
    pub node_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRelationReq {
    pub relations: Vec<RelationPair>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyNodeReq {
    pub node_id: u64,
    pub node_name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyGroupReq {
    pub group_id: u64,
    pub group_name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdsReq {
    pub node_ids: Vec<u64>,
}

// ── Views ──────────────────────────────────────────────────────────

/// `cpu`/`memory`/`npu` broken out of a cluster resource list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceView {
    pub cpu: Quantity,
    pub memory: Quantity,
    pub npu: Quantity,
}

impl ResourceView {
    pub fn from_list(list: &ResourceList, labels: &LabelsConfig) -> Self {
        Self {
            cpu: list.amount(CPU),
            memory: list.amount(MEMORY),
            npu: list.amount(&labels.npu_resource),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    #[serde(flatten)]
    pub node: NodeInfo,
    pub node_status: NodeStatus,
    pub allocatable: ResourceView,
    /// Names of the groups the node belongs to, comma-joined.
    pub node_group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRefView {
    pub group_id: u64,
    pub group_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetail {
    #[serde(flatten)]
    pub view: NodeView,
    /// `None` when the node is not currently reporting to the cluster.
    pub available: Option<ResourceView>,
    pub node_groups: Vec<GroupRefView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    #[serde(flatten)]
    pub group: NodeGroup,
    pub node_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetail {
    #[serde(flatten)]
    pub view: GroupView,
    pub allocated: ResourceView,
    pub nodes: Vec<NodeView>,
}

/// Managed node counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatistics {
    pub ready: u64,
    pub not_ready: u64,
    pub offline: u64,
    pub unknown: u64,
}

impl NodeStatistics {
    pub fn count(&mut self, status: NodeStatus) {
        match status {
            NodeStatus::Ready => self.ready += 1,
            NodeStatus::NotReady => self.not_ready += 1,
            NodeStatus::Offline => self.offline += 1,
            NodeStatus::Unknown => self.unknown += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberCount {
    pub group_id: u64,
    pub group_name: String,
    pub node_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatistics {
    pub total: u64,
    pub groups: Vec<GroupMemberCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationFailure {
    pub group_id: u64,
    pub node_id: u64,
    pub reason: String,
}

/// Outcome of a relation batch delete, keyed by pair rather than id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationBatch {
    pub success: Vec<RelationPair>,
    pub failed: Vec<RelationFailure>,
}

impl RelationBatch {
    pub fn fail(&mut self, pair: RelationPair, reason: impl Into<String>) {
        self.failed.push(RelationFailure {
            group_id: pair.group_id,
            node_id: pair.node_id,
            reason: reason.into(),
        });
    }
}
