//! ClusterFacade — the typed surface every manager talks to.
//!
//! Idempotent calls (reads, deletes, updates, label patches) are retried
//! on transient and conflict errors with linear backoff. Creates are
//! retried only on transient errors; an `AlreadyExists` after a retry is
//! reported to the caller as a conflict.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use edgefleet_core::ResourceList;
use edgefleet_core::config::ClusterConfig;
use tracing::{debug, warn};

use crate::api::{ClusterApi, Watch};
use crate::error::{ClusterError, ClusterResult};
use crate::types::*;

#[derive(Clone)]
pub struct ClusterFacade {
    api: Arc<dyn ClusterApi>,
    namespace: String,
    attempts: u32,
    backoff: Duration,
}

fn idempotent_retry(err: &ClusterError) -> bool {
    matches!(err, ClusterError::Transient(_) | ClusterError::Conflict(_))
}

fn create_retry(err: &ClusterError) -> bool {
    err.is_transient()
}

/// Map a delete result so that a missing object counts as deleted.
/// Returns whether the object existed.
fn tolerate_missing(result: ClusterResult<()>, what: &str, name: &str) -> ClusterResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            warn!(kind = what, %name, "delete of missing object treated as success");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

impl ClusterFacade {
    pub fn new(api: Arc<dyn ClusterApi>, config: &ClusterConfig) -> Self {
        Self {
            api,
            namespace: config.namespace.clone(),
            attempts: config.retry_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn retry<T, F, Fut>(
        &self,
        op: &'static str,
        retryable: fn(&ClusterError) -> bool,
        f: F,
    ) -> ClusterResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ClusterResult<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match f().await {
                Err(e) if attempt < self.attempts && retryable(&e) => {
                    warn!(op, attempt, error = %e, "cluster call failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    // ── Nodes ──────────────────────────────────────────────────────

    pub async fn list_nodes(&self) -> ClusterResult<Vec<ClusterNode>> {
        self.retry("list_nodes", idempotent_retry, || self.api.list_nodes())
            .await
    }

    pub async fn get_node(&self, name: &str) -> ClusterResult<ClusterNode> {
        self.retry("get_node", idempotent_retry, || self.api.get_node(name))
            .await
    }

    pub async fn delete_node(&self, name: &str) -> ClusterResult<bool> {
        let result = self
            .retry("delete_node", idempotent_retry, || self.api.delete_node(name))
            .await;
        tolerate_missing(result, "node", name)
    }

    pub async fn patch_node_labels(
        &self,
        name: &str,
        patch: &LabelPatch,
    ) -> ClusterResult<ClusterNode> {
        let node = self
            .retry("patch_node_labels", idempotent_retry, || {
                self.api.patch_node_labels(name, patch)
            })
            .await?;
        debug!(node = %name, added = ?patch.add.keys().collect::<Vec<_>>(), removed = ?patch.remove, "node labels patched");
        Ok(node)
    }

    // ── Secrets ────────────────────────────────────────────────────

    /// Create the secret, or overwrite it when it already exists.
    pub async fn create_or_update_secret(&self, secret: &Secret) -> ClusterResult<()> {
        let mut secret = secret.clone();
        secret.namespace = self.namespace.clone();
        let secret = &secret;
        match self
            .retry("create_secret", create_retry, || self.api.create_secret(secret))
            .await
        {
            Err(ClusterError::AlreadyExists { .. }) => {
                self.retry("update_secret", idempotent_retry, || {
                    self.api.update_secret(secret)
                })
                .await
            }
            other => other,
        }
    }

    pub async fn get_secret(&self, name: &str) -> ClusterResult<Secret> {
        self.retry("get_secret", idempotent_retry, || self.api.get_secret(name))
            .await
    }

    pub async fn delete_secret(&self, name: &str) -> ClusterResult<bool> {
        let result = self
            .retry("delete_secret", idempotent_retry, || self.api.delete_secret(name))
            .await;
        tolerate_missing(result, "secret", name)
    }

    // ── Configmaps ─────────────────────────────────────────────────

    pub async fn create_config_map(&self, config_map: &ConfigMap) -> ClusterResult<()> {
        let mut config_map = config_map.clone();
        config_map.namespace = self.namespace.clone();
        let config_map = &config_map;
        self.retry("create_config_map", create_retry, || {
            self.api.create_config_map(config_map)
        })
        .await
    }

    pub async fn update_config_map(&self, config_map: &ConfigMap) -> ClusterResult<()> {
        let mut config_map = config_map.clone();
        config_map.namespace = self.namespace.clone();
        let config_map = &config_map;
        self.retry("update_config_map", idempotent_retry, || {
            self.api.update_config_map(config_map)
        })
        .await
    }

    pub async fn delete_config_map(&self, name: &str) -> ClusterResult<bool> {
        let result = self
            .retry("delete_config_map", idempotent_retry, || {
                self.api.delete_config_map(name)
            })
            .await;
        tolerate_missing(result, "configmap", name)
    }

    // ── Workloads ──────────────────────────────────────────────────

    pub async fn create_workload(&self, spec: &WorkloadSpec) -> ClusterResult<()> {
        let mut spec = spec.clone();
        spec.namespace = self.namespace.clone();
        let spec = &spec;
        self.retry("create_workload", create_retry, || self.api.create_workload(spec))
            .await?;
        debug!(workload = %spec.name, "workload created");
        Ok(())
    }

    pub async fn update_workload(&self, spec: &WorkloadSpec) -> ClusterResult<()> {
        let mut spec = spec.clone();
        spec.namespace = self.namespace.clone();
        let spec = &spec;
        self.retry("update_workload", idempotent_retry, || self.api.update_workload(spec))
            .await
    }

    pub async fn delete_workload(&self, name: &str) -> ClusterResult<bool> {
        let result = self
            .retry("delete_workload", idempotent_retry, || self.api.delete_workload(name))
            .await;
        tolerate_missing(result, "workload", name)
    }

    pub async fn get_workload(&self, name: &str) -> ClusterResult<WorkloadSpec> {
        self.retry("get_workload", idempotent_retry, || self.api.get_workload(name))
            .await
    }

    // ── Pods ───────────────────────────────────────────────────────

    pub async fn list_pods(&self) -> ClusterResult<Vec<Pod>> {
        self.retry("list_pods", idempotent_retry, || self.api.list_pods())
            .await
    }

    pub async fn force_delete_pod(&self, name: &str) -> ClusterResult<bool> {
        let result = self
            .retry("force_delete_pod", idempotent_retry, || {
                self.api.force_delete_pod(name)
            })
            .await;
        tolerate_missing(result, "pod", name)
    }

    /// Sum of resource requests over every pod placed on `node`.
    pub async fn node_allocated_resources(&self, node: &str) -> ClusterResult<ResourceList> {
        let pods = self.list_pods().await?;
        let mut total = ResourceList::new();
        for pod in pods.iter().filter(|p| p.node_name == node) {
            total.add(&pod.requests());
        }
        Ok(total)
    }

    // ── Watches ────────────────────────────────────────────────────

    pub async fn watch_nodes(&self) -> ClusterResult<Watch<ClusterNode>> {
        let events = self.api.subscribe_nodes();
        let initial = self.list_nodes().await?;
        Ok(Watch { initial, events })
    }

    pub async fn watch_pods(&self) -> ClusterResult<Watch<Pod>> {
        let events = self.api.subscribe_pods();
        let initial = self.list_pods().await?;
        Ok(Watch { initial, events })
    }

    pub async fn watch_workloads(&self) -> ClusterResult<Watch<WorkloadSpec>> {
        let events = self.api.subscribe_workloads();
        let initial = self
            .retry("list_workloads", idempotent_retry, || self.api.list_workloads())
            .await?;
        Ok(Watch { initial, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCluster;
    use edgefleet_core::Quantity;

    fn facade() -> (Arc<MemoryCluster>, ClusterFacade) {
        let cluster = Arc::new(MemoryCluster::new());
        let facade = ClusterFacade::new(cluster.clone(), &ClusterConfig::default())
            .with_retry(3, Duration::from_millis(1));
        (cluster, facade)
    }

    #[tokio::test]
    async fn transient_reads_are_retried() {
        let (cluster, facade) = facade();
        cluster.add_node(ClusterNode::new("edge-01"));
        cluster.inject_transient_failures(2);
        let nodes = facade.list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[tokio::test]
    async fn retries_give_up_after_attempts() {
        let (cluster, facade) = facade();
        cluster.inject_transient_failures(5);
        let err = facade.list_nodes().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn delete_of_missing_object_succeeds() {
        let (_cluster, facade) = facade();
        assert!(!facade.delete_workload("nope").await.unwrap());
        assert!(!facade.delete_node("nope").await.unwrap());
    }

    #[tokio::test]
    async fn create_reports_conflict_not_retry() {
        let (_cluster, facade) = facade();
        let spec = WorkloadSpec {
            name: "app-1".to_string(),
            ..Default::default()
        };
        facade.create_workload(&spec).await.unwrap();
        let err = facade.create_workload(&spec).await.unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn secret_upsert_overwrites() {
        let (cluster, facade) = facade();
        let mut secret = Secret {
            name: "registry".to_string(),
            kind: DOCKER_CONFIG_JSON_TYPE.to_string(),
            ..Default::default()
        };
        facade.create_or_update_secret(&secret).await.unwrap();
        secret.data.insert("k".to_string(), b"v".to_vec());
        facade.create_or_update_secret(&secret).await.unwrap();
        let stored = cluster.secret("registry").unwrap();
        assert_eq!(stored.data["k"], b"v".to_vec());
        assert_eq!(stored.namespace, "edgefleet-user");
    }

    #[tokio::test]
    async fn allocated_resources_sum_pods_on_node() {
        let (cluster, facade) = facade();
        cluster.add_node(ClusterNode::new("edge-01").with_label("g", ""));
        let container = ContainerSpec {
            name: "c".to_string(),
            resources: ResourceRequirements {
                requests: ResourceList::new().with("cpu", Quantity::from_millis(500)),
                limits: ResourceList::new(),
            },
            ..Default::default()
        };
        for name in ["a", "b"] {
            let spec = WorkloadSpec {
                name: name.to_string(),
                template: PodTemplate {
                    node_selector: Labels::from([("g".to_string(), String::new())]),
                    containers: vec![container.clone()],
                    ..Default::default()
                },
                ..Default::default()
            };
            facade.create_workload(&spec).await.unwrap();
        }
        let used = facade.node_allocated_resources("edge-01").await.unwrap();
        assert_eq!(used.amount("cpu"), Quantity::from_units(1));
    }

    #[tokio::test]
    async fn watch_continues_after_initial_list() {
        let (cluster, facade) = facade();
        cluster.add_node(ClusterNode::new("edge-01"));
        let mut watch = facade.watch_nodes().await.unwrap();
        assert_eq!(watch.initial.len(), 1);
        cluster.add_node(ClusterNode::new("edge-02"));
        let ev = watch.events.recv().await.unwrap();
        assert!(matches!(ev, WatchEvent::Added(n) if n.name == "edge-02"));
    }
}
