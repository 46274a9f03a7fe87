//! Cluster primitives as seen through the facade.
//!
//! These mirror the subset of the Kubernetes object model the control
//! plane reads and writes: nodes, daemon-set style workloads, their pods,
//! secrets, and configmaps.

use std::collections::BTreeMap;

use edgefleet_core::ResourceList;
use serde::{Deserialize, Serialize};

pub type Labels = BTreeMap<String, String>;

pub const CONDITION_READY: &str = "Ready";
pub const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

// ── Nodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub kind: String,
    /// `True`, `False`, or `Unknown`.
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    pub labels: Labels,
    pub internal_ip: String,
    pub conditions: Vec<NodeCondition>,
    pub capacity: ResourceList,
    pub allocatable: ResourceList,
}

impl ClusterNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_allocatable(mut self, allocatable: ResourceList) -> Self {
        self.capacity = allocatable.clone();
        self.allocatable = allocatable;
        self
    }

    /// Replace (or add) the `Ready` condition.
    pub fn with_ready(mut self, status: &str) -> Self {
        self.set_condition(CONDITION_READY, status);
        self
    }

    pub fn set_condition(&mut self, kind: &str, status: &str) {
        match self.conditions.iter_mut().find(|c| c.kind == kind) {
            Some(cond) => cond.status = status.to_string(),
            None => self.conditions.push(NodeCondition {
                kind: kind.to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Status of the first `Ready` condition, if reported.
    pub fn ready_condition(&self) -> Option<&str> {
        self.conditions
            .iter()
            .find(|c| c.kind == CONDITION_READY)
            .map(|c| c.status.as_str())
    }
}

/// Label changes applied by one patch call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPatch {
    pub add: Labels,
    pub remove: Vec<String>,
}

impl LabelPatch {
    pub fn add(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            add: Labels::from([(key.into(), value.into())]),
            remove: Vec::new(),
        }
    }

    pub fn remove(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            add: Labels::new(),
            remove: keys.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    pub fn apply(&self, labels: &mut Labels) {
        for key in &self.remove {
            labels.remove(key);
        }
        for (k, v) in &self.add {
            labels.insert(k.clone(), v.clone());
        }
    }
}

// ── Workloads ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    pub name: String,
    pub container_port: u32,
    pub host_port: Option<u32>,
    pub host_ip: Option<String>,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub requests: ResourceList,
    pub limits: ResourceList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub run_as_user: Option<u32>,
    pub run_as_group: Option<u32>,
    pub run_as_non_root: bool,
    pub read_only_root_filesystem: bool,
    pub allow_privilege_escalation: bool,
    pub drop_capabilities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub image_pull_policy: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
    pub ports: Vec<ContainerPort>,
    pub resources: ResourceRequirements,
    pub volume_mounts: Vec<VolumeMount>,
    pub security_context: SecurityContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeSource {
    ConfigMap { name: String },
    HostPath { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub labels: Labels,
    pub node_selector: Labels,
    pub containers: Vec<ContainerSpec>,
    pub volumes: Vec<Volume>,
    pub image_pull_secrets: Vec<String>,
    pub automount_service_account_token: bool,
}

/// A daemon-set style workload: one pod per node matching the selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub selector: Labels,
    pub template: PodTemplate,
    /// Rolling-update budget, e.g. `"100%"`.
    pub max_unavailable: String,
}

impl WorkloadSpec {
    /// Requests of one pod, summed over containers.
    pub fn pod_requests(&self) -> ResourceList {
        let mut total = ResourceList::new();
        for c in &self.template.containers {
            total.add(&c.resources.requests);
        }
        total
    }

    /// Limits of one pod, summed over containers.
    pub fn pod_limits(&self) -> ResourceList {
        let mut total = ResourceList::new();
        for c in &self.template.containers {
            total.add(&c.resources.limits);
        }
        total
    }
}

// ── Pods ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }
}

/// Per-container state as reported by the cluster: at most one member is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStateUnion {
    pub waiting: Option<String>,
    pub running: Option<u64>,
    pub terminated: Option<i32>,
}

impl ContainerStateUnion {
    pub fn running(started_at: u64) -> Self {
        Self {
            running: Some(started_at),
            ..Default::default()
        }
    }

    pub fn waiting(reason: impl Into<String>) -> Self {
        Self {
            waiting: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn terminated(exit_code: i32) -> Self {
        Self {
            terminated: Some(exit_code),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub state: ContainerStateUnion,
    pub restart_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub node_name: String,
    pub node_selector: Labels,
    pub containers: Vec<ContainerSpec>,
    pub phase: PodPhase,
    pub container_statuses: Vec<ContainerStatus>,
    /// Unix seconds at which deletion was requested.
    pub deletion_timestamp: Option<u64>,
    /// Owning workload name.
    pub owner: String,
}

impl Pod {
    pub fn requests(&self) -> ResourceList {
        let mut total = ResourceList::new();
        for c in &self.containers {
            total.add(&c.resources.requests);
        }
        total
    }
}

// ── Secrets and configmaps ─────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub namespace: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub data: BTreeMap<String, String>,
}

// ── Watches ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// `true` when every selector pair is present in `labels`.
pub fn selector_matches(selector: &Labels, labels: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgefleet_core::Quantity;

    #[test]
    fn label_patch_removes_before_adding() {
        let mut labels = Labels::from([("a".to_string(), "1".to_string())]);
        let patch = LabelPatch {
            add: Labels::from([("a".to_string(), "2".to_string())]),
            remove: vec!["a".to_string()],
        };
        patch.apply(&mut labels);
        assert_eq!(labels["a"], "2");
    }

    #[test]
    fn ready_condition_first_match() {
        let node = ClusterNode::new("edge-01").with_ready("True").with_ready("False");
        assert_eq!(node.ready_condition(), Some("False"));
        assert_eq!(ClusterNode::new("edge-02").ready_condition(), None);
    }

    #[test]
    fn pod_limits_sum_containers() {
        let container = |cpu: i64| ContainerSpec {
            resources: ResourceRequirements {
                requests: ResourceList::new().with("cpu", Quantity::from_units(cpu)),
                limits: ResourceList::new().with("cpu", Quantity::from_units(cpu)),
            },
            ..Default::default()
        };
        let spec = WorkloadSpec {
            template: PodTemplate {
                containers: vec![container(1), container(2)],
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(spec.pod_limits().amount("cpu"), Quantity::from_units(3));
    }

    #[test]
    fn empty_selector_matches_everything() {
        let labels = Labels::from([("x".to_string(), String::new())]);
        assert!(selector_matches(&Labels::new(), &labels));
        assert!(selector_matches(&labels, &labels));
        assert!(!selector_matches(&Labels::from([("y".to_string(), String::new())]), &labels));
    }
}
