//! The backend seam: everything the control plane asks of a cluster.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::ClusterResult;
use crate::types::{ClusterNode, ConfigMap, LabelPatch, Pod, Secret, WatchEvent, WorkloadSpec};

/// Raw cluster operations. Implementations report every failure as-is;
/// retries and not-found tolerance live in [`crate::ClusterFacade`].
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_nodes(&self) -> ClusterResult<Vec<ClusterNode>>;
    async fn get_node(&self, name: &str) -> ClusterResult<ClusterNode>;
    async fn delete_node(&self, name: &str) -> ClusterResult<()>;
    async fn patch_node_labels(&self, name: &str, patch: &LabelPatch) -> ClusterResult<ClusterNode>;

    async fn create_secret(&self, secret: &Secret) -> ClusterResult<()>;
    async fn update_secret(&self, secret: &Secret) -> ClusterResult<()>;
    async fn get_secret(&self, name: &str) -> ClusterResult<Secret>;
    async fn delete_secret(&self, name: &str) -> ClusterResult<()>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> ClusterResult<()>;
    async fn update_config_map(&self, config_map: &ConfigMap) -> ClusterResult<()>;
    async fn delete_config_map(&self, name: &str) -> ClusterResult<()>;

    async fn create_workload(&self, spec: &WorkloadSpec) -> ClusterResult<()>;
    async fn update_workload(&self, spec: &WorkloadSpec) -> ClusterResult<()>;
    async fn delete_workload(&self, name: &str) -> ClusterResult<()>;
    async fn get_workload(&self, name: &str) -> ClusterResult<WorkloadSpec>;
    async fn list_workloads(&self) -> ClusterResult<Vec<WorkloadSpec>>;

    async fn list_pods(&self) -> ClusterResult<Vec<Pod>>;
    /// Delete immediately, skipping graceful termination.
    async fn force_delete_pod(&self, name: &str) -> ClusterResult<()>;

    fn subscribe_nodes(&self) -> broadcast::Receiver<WatchEvent<ClusterNode>>;
    fn subscribe_pods(&self) -> broadcast::Receiver<WatchEvent<Pod>>;
    fn subscribe_workloads(&self) -> broadcast::Receiver<WatchEvent<WorkloadSpec>>;
}

/// A listed snapshot plus the event stream that continues it.
///
/// The receiver is subscribed before the list is taken, so an event may
/// appear both in `initial` and on the stream; consumers must treat
/// events as idempotent upserts.
pub struct Watch<T> {
    pub initial: Vec<T>,
    pub events: broadcast::Receiver<WatchEvent<T>>,
}
