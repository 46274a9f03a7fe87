//! In-process cluster backend.
//!
//! Stands in for a real cluster in standalone mode and in tests. A built-in
//! daemon-set controller keeps exactly one pod per (workload, matching node)
//! and every mutation is published on the watch channels.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use edgefleet_core::time::epoch_secs;
use tokio::sync::broadcast;
use tracing::debug;

use crate::api::ClusterApi;
use crate::error::{ClusterError, ClusterResult};
use crate::types::*;

const WATCH_CAPACITY: usize = 1024;

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, ClusterNode>,
    workloads: BTreeMap<String, WorkloadSpec>,
    pods: BTreeMap<String, Pod>,
    secrets: BTreeMap<String, Secret>,
    config_maps: BTreeMap<String, ConfigMap>,
}

/// Events produced under the lock and published after it is released.
#[derive(Default)]
struct Pending {
    nodes: Vec<WatchEvent<ClusterNode>>,
    pods: Vec<WatchEvent<Pod>>,
    workloads: Vec<WatchEvent<WorkloadSpec>>,
}

pub struct MemoryCluster {
    inner: Mutex<Inner>,
    /// Number of upcoming API calls that fail with `Transient`.
    faults: AtomicU32,
    nodes_tx: broadcast::Sender<WatchEvent<ClusterNode>>,
    pods_tx: broadcast::Sender<WatchEvent<Pod>>,
    workloads_tx: broadcast::Sender<WatchEvent<WorkloadSpec>>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            faults: AtomicU32::new(0),
            nodes_tx: broadcast::channel(WATCH_CAPACITY).0,
            pods_tx: broadcast::channel(WATCH_CAPACITY).0,
            workloads_tx: broadcast::channel(WATCH_CAPACITY).0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_fault(&self, op: &str) -> ClusterResult<()> {
        let taken = self
            .faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            debug!(op, "injected transient failure");
            return Err(ClusterError::Transient(format!("{op}: connection reset")));
        }
        Ok(())
    }

    /// Apply `f` under the lock, run the controller, then publish events.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Inner, &mut Pending) -> ClusterResult<T>,
    ) -> ClusterResult<T> {
        let mut pending = Pending::default();
        let out = {
            let mut inner = self.lock();
            let out = f(&mut inner, &mut pending)?;
            inner.reconcile(&mut pending);
            out
        };
        for ev in pending.nodes {
            let _ = self.nodes_tx.send(ev);
        }
        for ev in pending.workloads {
            let _ = self.workloads_tx.send(ev);
        }
        for ev in pending.pods {
            let _ = self.pods_tx.send(ev);
        }
        Ok(out)
    }

    // ── Test and standalone controls ───────────────────────────────

    /// Make the next `count` API calls fail with a transient error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.faults.store(count, Ordering::SeqCst);
    }

    /// Register or replace a node, as a kubelet joining would.
    pub fn add_node(&self, node: ClusterNode) {
        let _ = self.mutate(|inner, pending| {
            let event = if inner.nodes.contains_key(&node.name) {
                WatchEvent::Modified(node.clone())
            } else {
                WatchEvent::Added(node.clone())
            };
            inner.nodes.insert(node.name.clone(), node);
            pending.nodes.push(event);
            Ok(())
        });
    }

    pub fn set_node_ready(&self, name: &str, status: &str) -> ClusterResult<()> {
        self.mutate(|inner, pending| {
            let node = inner
                .nodes
                .get_mut(name)
                .ok_or_else(|| ClusterError::not_found("node", name))?;
            node.set_condition(CONDITION_READY, status);
            pending.nodes.push(WatchEvent::Modified(node.clone()));
            Ok(())
        })
    }

    /// Mutate a pod in place (phase, container states) and publish the change.
    pub fn update_pod(&self, name: &str, f: impl FnOnce(&mut Pod)) -> ClusterResult<()> {
        self.mutate(|inner, pending| {
            let pod = inner
                .pods
                .get_mut(name)
                .ok_or_else(|| ClusterError::not_found("pod", name))?;
            f(pod);
            pending.pods.push(WatchEvent::Modified(pod.clone()));
            Ok(())
        })
    }

    /// Flag a pod as terminating since `at` (unix seconds) without removing it.
    pub fn mark_pod_terminating(&self, name: &str, at: u64) -> ClusterResult<()> {
        self.update_pod(name, |pod| pod.deletion_timestamp = Some(at))
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.lock().pods.get(name).cloned()
    }

    pub fn pods_on_node(&self, node: &str) -> Vec<Pod> {
        self.lock()
            .pods
            .values()
            .filter(|p| p.node_name == node)
            .cloned()
            .collect()
    }

    pub fn node(&self, name: &str) -> Option<ClusterNode> {
        self.lock().nodes.get(name).cloned()
    }

    pub fn workload_names(&self) -> Vec<String> {
        self.lock().workloads.keys().cloned().collect()
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        self.lock().secrets.get(name).cloned()
    }

    pub fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.lock().config_maps.get(name).cloned()
    }
}

impl Inner {
    /// Daemon-set controller: one pod per (workload, node whose labels
    /// satisfy the node selector), named `<workload>-<node>`.
    fn reconcile(&mut self, pending: &mut Pending) {
        let mut desired = BTreeMap::new();
        for ws in self.workloads.values() {
            for node in self.nodes.values() {
                if selector_matches(&ws.template.node_selector, &node.labels) {
                    let name = format!("{}-{}", ws.name, node.name);
                    desired.insert(name.clone(), new_pod(ws, &node.name, name));
                }
            }
        }

        let stale: Vec<String> = self
            .pods
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            if let Some(pod) = self.pods.remove(&name) {
                pending.pods.push(WatchEvent::Deleted(pod));
            }
        }

        for (name, pod) in desired {
            match self.pods.get_mut(&name) {
                None => {
                    pending.pods.push(WatchEvent::Added(pod.clone()));
                    self.pods.insert(name, pod);
                }
                Some(existing)
                    if existing.containers != pod.containers || existing.labels != pod.labels =>
                {
                    // Template changed: roll the pod.
                    *existing = pod;
                    pending.pods.push(WatchEvent::Modified(existing.clone()));
                }
                Some(_) => {}
            }
        }
    }
}

fn new_pod(ws: &WorkloadSpec, node: &str, name: String) -> Pod {
    let started = epoch_secs();
    Pod {
        name,
        namespace: ws.namespace.clone(),
        labels: ws.template.labels.clone(),
        node_name: node.to_string(),
        node_selector: ws.template.node_selector.clone(),
        containers: ws.template.containers.clone(),
        phase: PodPhase::Running,
        container_statuses: ws
            .template
            .containers
            .iter()
            .map(|c| ContainerStatus {
                name: c.name.clone(),
                state: ContainerStateUnion::running(started),
                restart_count: 0,
            })
            .collect(),
        deletion_timestamp: None,
        owner: ws.name.clone(),
    }
}

fn require_name(kind: &str, name: &str) -> ClusterResult<()> {
    if name.is_empty() {
        return Err(ClusterError::Invalid(format!("{kind} name is empty")));
    }
    Ok(())
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn list_nodes(&self) -> ClusterResult<Vec<ClusterNode>> {
        self.check_fault("list_nodes")?;
        Ok(self.lock().nodes.values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> ClusterResult<ClusterNode> {
        self.check_fault("get_node")?;
        self.lock()
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("node", name))
    }

    async fn delete_node(&self, name: &str) -> ClusterResult<()> {
        self.check_fault("delete_node")?;
        self.mutate(|inner, pending| {
            let node = inner
                .nodes
                .remove(name)
                .ok_or_else(|| ClusterError::not_found("node", name))?;
            pending.nodes.push(WatchEvent::Deleted(node));
            Ok(())
        })
    }

    async fn patch_node_labels(&self, name: &str, patch: &LabelPatch) -> ClusterResult<ClusterNode> {
        self.check_fault("patch_node_labels")?;
        self.mutate(|inner, pending| {
            let node = inner
                .nodes
                .get_mut(name)
                .ok_or_else(|| ClusterError::not_found("node", name))?;
            patch.apply(&mut node.labels);
            pending.nodes.push(WatchEvent::Modified(node.clone()));
            Ok(node.clone())
        })
    }

    async fn create_secret(&self, secret: &Secret) -> ClusterResult<()> {
        self.check_fault("create_secret")?;
        require_name("secret", &secret.name)?;
        let mut inner = self.lock();
        if inner.secrets.contains_key(&secret.name) {
            return Err(ClusterError::already_exists("secret", &secret.name));
        }
        inner.secrets.insert(secret.name.clone(), secret.clone());
        Ok(())
    }

    async fn update_secret(&self, secret: &Secret) -> ClusterResult<()> {
        self.check_fault("update_secret")?;
        let mut inner = self.lock();
        match inner.secrets.get_mut(&secret.name) {
            Some(existing) => {
                *existing = secret.clone();
                Ok(())
            }
            None => Err(ClusterError::not_found("secret", &secret.name)),
        }
    }

    async fn get_secret(&self, name: &str) -> ClusterResult<Secret> {
        self.check_fault("get_secret")?;
        self.lock()
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("secret", name))
    }

    async fn delete_secret(&self, name: &str) -> ClusterResult<()> {
        self.check_fault("delete_secret")?;
        self.lock()
            .secrets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("secret", name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> ClusterResult<()> {
        self.check_fault("create_config_map")?;
        require_name("configmap", &config_map.name)?;
        let mut inner = self.lock();
        if inner.config_maps.contains_key(&config_map.name) {
            return Err(ClusterError::already_exists("configmap", &config_map.name));
        }
        inner
            .config_maps
            .insert(config_map.name.clone(), config_map.clone());
        Ok(())
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> ClusterResult<()> {
        self.check_fault("update_config_map")?;
        let mut inner = self.lock();
        match inner.config_maps.get_mut(&config_map.name) {
            Some(existing) => {
                *existing = config_map.clone();
                Ok(())
            }
            None => Err(ClusterError::not_found("configmap", &config_map.name)),
        }
    }

    async fn delete_config_map(&self, name: &str) -> ClusterResult<()> {
        self.check_fault("delete_config_map")?;
        self.lock()
            .config_maps
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("configmap", name))
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> ClusterResult<()> {
        self.check_fault("create_workload")?;
        require_name("workload", &spec.name)?;
        self.mutate(|inner, pending| {
            if inner.workloads.contains_key(&spec.name) {
                return Err(ClusterError::already_exists("workload", &spec.name));
            }
            inner.workloads.insert(spec.name.clone(), spec.clone());
            pending.workloads.push(WatchEvent::Added(spec.clone()));
            Ok(())
        })
    }

    async fn update_workload(&self, spec: &WorkloadSpec) -> ClusterResult<()> {
        self.check_fault("update_workload")?;
        self.mutate(|inner, pending| {
            let existing = inner
                .workloads
                .get_mut(&spec.name)
                .ok_or_else(|| ClusterError::not_found("workload", &spec.name))?;
            *existing = spec.clone();
            pending.workloads.push(WatchEvent::Modified(spec.clone()));
            Ok(())
        })
    }

    async fn delete_workload(&self, name: &str) -> ClusterResult<()> {
        self.check_fault("delete_workload")?;
        self.mutate(|inner, pending| {
            let spec = inner
                .workloads
                .remove(name)
                .ok_or_else(|| ClusterError::not_found("workload", name))?;
            pending.workloads.push(WatchEvent::Deleted(spec));
            Ok(())
        })
    }

    async fn get_workload(&self, name: &str) -> ClusterResult<WorkloadSpec> {
        self.check_fault("get_workload")?;
        self.lock()
            .workloads
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::not_found("workload", name))
    }

    async fn list_workloads(&self) -> ClusterResult<Vec<WorkloadSpec>> {
        self.check_fault("list_workloads")?;
        Ok(self.lock().workloads.values().cloned().collect())
    }

    async fn list_pods(&self) -> ClusterResult<Vec<Pod>> {
        self.check_fault("list_pods")?;
        Ok(self.lock().pods.values().cloned().collect())
    }

    async fn force_delete_pod(&self, name: &str) -> ClusterResult<()> {
        self.check_fault("force_delete_pod")?;
        self.mutate(|inner, pending| {
            let pod = inner
                .pods
                .remove(name)
                .ok_or_else(|| ClusterError::not_found("pod", name))?;
            pending.pods.push(WatchEvent::Deleted(pod));
            Ok(())
        })
    }

    fn subscribe_nodes(&self) -> broadcast::Receiver<WatchEvent<ClusterNode>> {
        self.nodes_tx.subscribe()
    }

    fn subscribe_pods(&self) -> broadcast::Receiver<WatchEvent<Pod>> {
        self.pods_tx.subscribe()
    }

    fn subscribe_workloads(&self) -> broadcast::Receiver<WatchEvent<WorkloadSpec>> {
        self.workloads_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_selector() -> Labels {
        Labels::from([("EdgeFleet-Node1".to_string(), String::new())])
    }

    fn workload(name: &str) -> WorkloadSpec {
        WorkloadSpec {
            name: name.to_string(),
            namespace: "edgefleet-user".to_string(),
            template: PodTemplate {
                node_selector: group_selector(),
                containers: vec![ContainerSpec {
                    name: "main".to_string(),
                    image: "nginx:1.0".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn workload_places_one_pod_per_matching_node() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ClusterNode::new("edge-01").with_label("EdgeFleet-Node1", ""));
        cluster.add_node(ClusterNode::new("edge-02"));

        cluster.create_workload(&workload("app-1")).await.unwrap();
        let pods = cluster.list_pods().await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "app-1-edge-01");
        assert_eq!(pods[0].phase, PodPhase::Running);
        assert!(pods[0].container_statuses[0].state.running.is_some());
    }

    #[tokio::test]
    async fn labeling_a_node_schedules_and_unlabeling_evicts() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ClusterNode::new("edge-02"));
        cluster.create_workload(&workload("app-1")).await.unwrap();
        assert!(cluster.pods_on_node("edge-02").is_empty());

        cluster
            .patch_node_labels("edge-02", &LabelPatch::add("EdgeFleet-Node1", ""))
            .await
            .unwrap();
        assert_eq!(cluster.pods_on_node("edge-02").len(), 1);

        cluster
            .patch_node_labels("edge-02", &LabelPatch::remove(["EdgeFleet-Node1".to_string()]))
            .await
            .unwrap();
        assert!(cluster.pods_on_node("edge-02").is_empty());
    }

    #[tokio::test]
    async fn deleting_workload_publishes_pod_deletes() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ClusterNode::new("edge-01").with_label("EdgeFleet-Node1", ""));
        cluster.create_workload(&workload("app-1")).await.unwrap();

        let mut pods = cluster.subscribe_pods();
        let mut workloads = cluster.subscribe_workloads();
        cluster.delete_workload("app-1").await.unwrap();

        assert!(matches!(workloads.recv().await.unwrap(), WatchEvent::Deleted(w) if w.name == "app-1"));
        assert!(matches!(pods.recv().await.unwrap(), WatchEvent::Deleted(p) if p.name == "app-1-edge-01"));
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let cluster = MemoryCluster::new();
        cluster.create_workload(&workload("app-1")).await.unwrap();
        let err = cluster.create_workload(&workload("app-1")).await.unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let cluster = MemoryCluster::new();
        cluster.inject_transient_failures(2);
        assert!(cluster.list_nodes().await.unwrap_err().is_transient());
        assert!(cluster.list_nodes().await.unwrap_err().is_transient());
        assert!(cluster.list_nodes().await.is_ok());
    }

    #[tokio::test]
    async fn terminating_pod_stays_until_forced() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ClusterNode::new("edge-01").with_label("EdgeFleet-Node1", ""));
        cluster.create_workload(&workload("app-1")).await.unwrap();

        cluster.mark_pod_terminating("app-1-edge-01", 100).unwrap();
        assert_eq!(cluster.pod("app-1-edge-01").unwrap().deletion_timestamp, Some(100));

        cluster.force_delete_pod("app-1-edge-01").await.unwrap();
        // The controller replaces it with a fresh pod.
        assert_eq!(cluster.pod("app-1-edge-01").unwrap().deletion_timestamp, None);
    }

    #[tokio::test]
    async fn updated_template_rolls_pods() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ClusterNode::new("edge-01").with_label("EdgeFleet-Node1", ""));
        let mut spec = workload("app-1");
        cluster.create_workload(&spec).await.unwrap();

        spec.template.containers[0].image = "nginx:2.0".to_string();
        cluster.update_workload(&spec).await.unwrap();
        let pod = cluster.pod("app-1-edge-01").unwrap();
        assert_eq!(pod.containers[0].image, "nginx:2.0");
    }
}
