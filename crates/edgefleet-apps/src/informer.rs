//! App-status informer — mirrors managed pods into `app_instances` and
//! managed workloads into `app_daemon_sets`.
//!
//! Both tables are derived. They are truncated (and every group
//! accumulator zeroed) before the first sync, then rebuilt from the
//! cluster. A workload the informer records or drops on its own, because
//! it was restored after a restart or deleted out of band, also moves the
//! group accumulator; rows written by deploy and undeploy are left alone.
//! While a deploy or undeploy holds a workload name, the informer neither
//! records nor drops that workload.
//!
//! Pod phases and container states live only in memory and are joined
//! into instance views on read.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use edgefleet_bus::routes::{RES_INNER_NODE_BY_UNIQUE_NAME, RES_INNER_NODE_STATUS, modules};
use edgefleet_bus::{ModuleBus, Operation, call};
use edgefleet_cluster::{
    ClusterFacade, ContainerStateUnion, Labels, Pod, WatchEvent, WorkloadSpec,
};
use edgefleet_core::PageQuery;
use edgefleet_core::config::{FleetConfig, LabelsConfig};
use edgefleet_core::inner::{NodeRef, NodeStatusResp, UniqueNameReq};
use edgefleet_core::labels::parse_app_labels;
use edgefleet_core::time::epoch_secs;
use edgefleet_state::{AppInstance, AppTable, InstanceRecord, NewDaemonSet, StateStore};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::types::{ContainerInfo, ContainerView, InstanceView, RunState};

const NODE_READY: &str = "ready";
const UNKNOWN: &str = "unknown";

#[derive(Clone)]
pub struct AppInformer {
    inner: Arc<Inner>,
}

struct Inner {
    cluster: ClusterFacade,
    store: StateStore,
    bus: ModuleBus,
    labels: LabelsConfig,
    max_pods: u64,
    resync: Duration,
    housekeeping: Duration,
    terminating_grace: u64,
    cache: RwLock<StatusCache>,
    /// Workload names a deploy or undeploy is working on.
    held: Mutex<HashMap<String, usize>>,
}

impl Inner {
    fn held(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases a held workload name on drop.
pub(crate) struct HeldWorkload {
    inner: Arc<Inner>,
    name: String,
}

impl Drop for HeldWorkload {
    fn drop(&mut self) {
        let mut held = self.inner.held();
        if let Some(count) = held.get_mut(&self.name) {
            *count -= 1;
            if *count == 0 {
                held.remove(&self.name);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContainerState {
    status: RunState,
    restart_count: u32,
}

#[derive(Default)]
struct StatusCache {
    /// Lowercase pod phase by pod name.
    pods: HashMap<String, String>,
    /// Keyed by `<pod>-<container>`.
    containers: HashMap<String, ContainerState>,
    /// Deletion timestamps of pods stuck terminating.
    terminating: HashMap<String, u64>,
}

fn container_key(pod: &str, container: &str) -> String {
    format!("{pod}-{container}")
}

fn run_state(state: &ContainerStateUnion) -> RunState {
    if state.running.is_some() {
        RunState::Running
    } else if state.terminated.is_some() {
        RunState::Terminated
    } else if state.waiting.is_some() {
        RunState::Waiting
    } else {
        RunState::Unknown
    }
}

impl AppInformer {
    pub fn new(
        cluster: ClusterFacade,
        store: StateStore,
        bus: ModuleBus,
        config: &FleetConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cluster,
                store,
                bus,
                labels: config.labels.clone(),
                max_pods: config.limits.max_pods,
                resync: Duration::from_secs(config.informer.pod_resync_secs.max(1)),
                housekeeping: Duration::from_secs(config.informer.housekeeping_secs.max(1)),
                terminating_grace: config.informer.terminating_grace_secs,
                cache: RwLock::new(StatusCache::default()),
                held: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Keep watch handling and resyncs away from `name` until the returned
    /// guard drops.
    pub(crate) fn hold(&self, name: &str) -> HeldWorkload {
        *self.inner.held().entry(name.to_string()).or_default() += 1;
        HeldWorkload {
            inner: self.inner.clone(),
            name: name.to_string(),
        }
    }

    fn is_held(&self, name: &str) -> bool {
        self.inner.held().contains_key(name)
    }

    fn read(&self) -> RwLockReadGuard<'_, StatusCache> {
        self.inner.cache.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StatusCache> {
        self.inner.cache.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Reset the derived tables, run the first sync, then follow both
    /// watches in the background until `shutdown` flips.
    ///
    /// Pod sync resolves nodes through the node manager, so its module
    /// must already be running.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> AppResult<JoinHandle<()>> {
        self.reset()?;
        let workloads = self.inner.cluster.watch_workloads().await?;
        let pods = self.inner.cluster.watch_pods().await?;
        self.resync_workloads(workloads.initial).await;
        self.resync_pods(pods.initial).await;
        info!(pods = self.read().pods.len(), "app informer synced");

        let this = self.clone();
        Ok(tokio::spawn(async move {
            this.run(Some(workloads.events), Some(pods.events), shutdown).await;
        }))
    }

    fn reset(&self) -> AppResult<()> {
        let (instances, daemon_sets) = self.inner.store.transaction(|db| -> AppResult<_> {
            let instances = db.truncate_instances()?;
            let daemon_sets = db.truncate_daemon_sets()?;
            db.reset_group_resources()?;
            Ok((instances, daemon_sets))
        })?;
        *self.write() = StatusCache::default();
        debug!(instances, daemon_sets, "derived app tables reset");
        Ok(())
    }

    async fn run(
        self,
        mut workloads: Option<broadcast::Receiver<WatchEvent<WorkloadSpec>>>,
        mut pods: Option<broadcast::Receiver<WatchEvent<Pod>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut resync = tokio::time::interval(self.inner.resync);
        resync.tick().await;
        let mut housekeeping = tokio::time::interval(self.inner.housekeeping);
        housekeeping.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = resync.tick() => {
                    workloads = self.rewatch_workloads().await;
                    pods = self.rewatch_pods().await;
                }
                _ = housekeeping.tick() => self.sweep_terminating(epoch_secs()).await,
                event = next_event(&mut workloads) => match event {
                    Ok(WatchEvent::Added(spec)) | Ok(WatchEvent::Modified(spec)) => {
                        self.observe_workload(&spec);
                    }
                    Ok(WatchEvent::Deleted(spec)) => self.forget_workload(&spec),
                    Err(e) => {
                        warn!(error = %e, "workload watch interrupted, relisting");
                        workloads = self.rewatch_workloads().await;
                    }
                },
                event = next_event(&mut pods) => match event {
                    Ok(WatchEvent::Added(pod)) | Ok(WatchEvent::Modified(pod)) => {
                        self.observe_pod(&pod).await;
                    }
                    Ok(WatchEvent::Deleted(pod)) => self.forget_pod(&pod),
                    Err(e) => {
                        warn!(error = %e, "pod watch interrupted, relisting");
                        pods = self.rewatch_pods().await;
                    }
                },
            }
        }

        debug!("app informer stopped");
    }

    async fn rewatch_workloads(&self) -> Option<broadcast::Receiver<WatchEvent<WorkloadSpec>>> {
        match self.inner.cluster.watch_workloads().await {
            Ok(watch) => {
                self.resync_workloads(watch.initial).await;
                Some(watch.events)
            }
            Err(e) => {
                warn!(error = %e, "workload watch unavailable, retrying on next resync");
                None
            }
        }
    }

    async fn rewatch_pods(&self) -> Option<broadcast::Receiver<WatchEvent<Pod>>> {
        match self.inner.cluster.watch_pods().await {
            Ok(watch) => {
                self.resync_pods(watch.initial).await;
                Some(watch.events)
            }
            Err(e) => {
                warn!(error = %e, "pod watch unavailable, retrying on next resync");
                None
            }
        }
    }

    // ── Workloads ──────────────────────────────────────────────────

    pub(crate) async fn resync_workloads(&self, listed: Vec<WorkloadSpec>) {
        let listed: Vec<WorkloadSpec> = listed
            .into_iter()
            .filter(|w| self.inner.labels.is_managed(&w.labels))
            .collect();
        let names: BTreeSet<&str> = listed.iter().map(|w| w.name.as_str()).collect();
        match self.inner.store.run(|db| db.all_daemon_sets()) {
            Ok(rows) => {
                for row in rows.iter().filter(|r| !names.contains(r.daemon_set_name.as_str())) {
                    self.drop_daemon_set(&row.daemon_set_name, None);
                }
            }
            Err(e) => warn!(error = %e, "daemon set listing failed"),
        }
        for spec in &listed {
            self.observe_workload(spec);
        }
    }

    fn observe_workload(&self, spec: &WorkloadSpec) {
        if !self.inner.labels.is_managed(&spec.labels) {
            return;
        }
        match self.record_workload(spec) {
            Ok(true) => info!(workload = %spec.name, "daemon set recorded from cluster"),
            Ok(false) => {}
            Err(e) => warn!(workload = %spec.name, error = %e, "workload not recorded"),
        }
    }

    /// Insert the row for a workload nobody recorded and charge its group.
    fn record_workload(&self, spec: &WorkloadSpec) -> AppResult<bool> {
        if self.is_held(&spec.name) {
            return Ok(false);
        }
        let (_, app_id) = parse_app_labels(&spec.labels)
            .ok_or_else(|| AppError::Invalid("workload carries no app labels".into()))?;
        let group_id = self
            .group_of(&spec.template.node_selector)
            .ok_or_else(|| AppError::Invalid("workload selects no node group".into()))?;
        let per_pod = spec.pod_limits();
        self.inner.store.transaction(|db| {
            if db.find_daemon_set_by_name(&spec.name)?.is_some() {
                return Ok(false);
            }
            db.get_app(AppTable::Apps, app_id)?;
            let group = db.get_group(group_id)?;
            db.insert_daemon_set(&NewDaemonSet {
                daemon_set_name: spec.name.clone(),
                app_id,
                node_group_id: group_id,
                node_group_name: group.group_name,
            })?;
            db.adjust_group_resources(group_id, &per_pod, false)?;
            Ok(true)
        })
    }

    fn forget_workload(&self, spec: &WorkloadSpec) {
        if self.inner.labels.is_managed(&spec.labels) {
            self.drop_daemon_set(&spec.name, Some(spec));
        }
    }

    /// Remove the row of a workload that left the cluster and release its
    /// share of the group. Without a spec the share is recomputed from the
    /// stored application.
    fn drop_daemon_set(&self, name: &str, spec: Option<&WorkloadSpec>) {
        if self.is_held(name) {
            debug!(workload = %name, "workload held by a deploy, not dropped");
            return;
        }
        let result = self.inner.store.transaction(|db| -> AppResult<bool> {
            let Some(row) = db.find_daemon_set_by_name(name)? else {
                return Ok(false);
            };
            let per_pod = match spec {
                Some(spec) => spec.pod_limits(),
                None => {
                    let app = db.get_app(AppTable::Apps, row.app_id)?;
                    let containers = crate::container::decode_containers(&app.containers)?;
                    crate::container::pod_limits(&containers, &self.inner.labels)
                }
            };
            db.delete_daemon_set_by_name(name)?;
            db.adjust_group_resources(row.node_group_id, &per_pod, true)?;
            Ok(true)
        });
        match result {
            Ok(true) => info!(workload = %name, "daemon set dropped after cluster deletion"),
            Ok(false) => {}
            Err(e) => warn!(workload = %name, error = %e, "daemon set not dropped"),
        }
    }

    fn group_of(&self, node_selector: &Labels) -> Option<u64> {
        node_selector
            .keys()
            .find_map(|k| self.inner.labels.parse_group_label(k))
    }

    // ── Pods ───────────────────────────────────────────────────────

    async fn resync_pods(&self, listed: Vec<Pod>) {
        let listed: Vec<Pod> = listed
            .into_iter()
            .filter(|p| self.inner.labels.is_managed(&p.labels))
            .collect();
        let names: BTreeSet<&str> = listed.iter().map(|p| p.name.as_str()).collect();
        let stale: Vec<String> = self
            .read()
            .pods
            .keys()
            .filter(|name| !names.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            self.forget_pod_named(&name, &[]);
        }
        match self
            .inner
            .store
            .run(|db| db.list_instances(&PageQuery::all()))
        {
            Ok(page) => {
                for row in page.items.iter().filter(|r| !names.contains(r.pod_name.as_str())) {
                    self.forget_pod_named(&row.pod_name, &[]);
                }
            }
            Err(e) => warn!(error = %e, "instance listing failed"),
        }
        for pod in &listed {
            self.observe_pod(pod).await;
        }
    }

    async fn observe_pod(&self, pod: &Pod) {
        if !self.inner.labels.is_managed(&pod.labels) {
            return;
        }
        self.cache_pod(pod);
        if let Err(e) = self.record_pod(pod).await {
            warn!(pod = %pod.name, error = %e, "instance not recorded");
        }
    }

    fn cache_pod(&self, pod: &Pod) {
        let mut cache = self.write();
        cache
            .pods
            .insert(pod.name.clone(), pod.phase.as_str().to_ascii_lowercase());
        for status in &pod.container_statuses {
            cache.containers.insert(
                container_key(&pod.name, &status.name),
                ContainerState {
                    status: run_state(&status.state),
                    restart_count: status.restart_count,
                },
            );
        }
        match pod.deletion_timestamp {
            Some(at) => cache.terminating.insert(pod.name.clone(), at),
            None => cache.terminating.remove(&pod.name),
        };
    }

    async fn record_pod(&self, pod: &Pod) -> AppResult<()> {
        let (app_name, app_id) = parse_app_labels(&pod.labels)
            .ok_or_else(|| AppError::Invalid("pod carries no app labels".into()))?;
        let group_id = self
            .group_of(&pod.node_selector)
            .ok_or_else(|| AppError::Invalid("pod selects no node group".into()))?;
        if pod.node_name.is_empty() {
            debug!(pod = %pod.name, "pod not scheduled yet");
            return Ok(());
        }

        let store = &self.inner.store;
        let known = store.run(|db| db.find_instance(&pod.name))?.is_some();
        if !known {
            let count = store.run(|db| db.count_instances())?;
            if count >= self.inner.max_pods {
                warn!(pod = %pod.name, max = self.inner.max_pods, "instance count at maximum, not recording pod");
                return Ok(());
            }
        }

        let node: NodeRef = call(
            &self.inner.bus,
            modules::APP_INFORMER,
            modules::NODE_MANAGER,
            Operation::Get,
            RES_INNER_NODE_BY_UNIQUE_NAME,
            &UniqueNameReq {
                unique_name: pod.node_name.clone(),
            },
        )
        .await?;
        let containers: Vec<ContainerInfo> = pod
            .containers
            .iter()
            .map(|c| ContainerInfo {
                name: c.name.clone(),
                image: c.image.clone(),
            })
            .collect();
        let record = InstanceRecord {
            pod_name: pod.name.clone(),
            node_unique_name: pod.node_name.clone(),
            node_id: node.node_id,
            node_name: node.node_name,
            node_group_id: group_id,
            app_name,
            app_id,
            container_info: serde_json::to_string(&containers)?,
        };
        store.run(|db| db.upsert_instance(&record))?;
        if !known {
            debug!(pod = %pod.name, node = %pod.node_name, "instance recorded");
        }
        Ok(())
    }

    fn forget_pod(&self, pod: &Pod) {
        if !self.inner.labels.is_managed(&pod.labels) {
            return;
        }
        let containers: Vec<&str> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        self.forget_pod_named(&pod.name, &containers);
    }

    /// Drop the row and cache entries of a pod. With no container names
    /// every cached container of the pod is dropped.
    fn forget_pod_named(&self, name: &str, containers: &[&str]) {
        {
            let mut cache = self.write();
            cache.pods.remove(name);
            cache.terminating.remove(name);
            if containers.is_empty() {
                let prefix = format!("{name}-");
                cache.containers.retain(|k, _| !k.starts_with(&prefix));
            } else {
                for c in containers {
                    cache.containers.remove(&container_key(name, c));
                }
            }
        }
        match self.inner.store.run(|db| db.delete_instance(name)) {
            Ok(true) => debug!(pod = %name, "instance removed"),
            Ok(false) => {}
            Err(e) => warn!(pod = %name, error = %e, "instance not removed"),
        }
    }

    /// Force-delete pods that have been terminating longer than the grace
    /// window, as of `now` (unix seconds).
    pub async fn sweep_terminating(&self, now: u64) {
        let grace = self.inner.terminating_grace;
        let stuck: Vec<String> = self
            .read()
            .terminating
            .iter()
            .filter(|(_, at)| now.saturating_sub(**at) >= grace)
            .map(|(name, _)| name.clone())
            .collect();
        for name in stuck {
            match self.inner.cluster.force_delete_pod(&name).await {
                Ok(existed) => info!(pod = %name, existed, "stuck terminating pod force-deleted"),
                Err(e) => warn!(pod = %name, error = %e, "force delete failed"),
            }
        }
    }

    // ── Views ──────────────────────────────────────────────────────

    /// Join instance rows with the live caches. Every state is `unknown`
    /// on a node that is not ready.
    pub async fn views(&self, rows: Vec<AppInstance>) -> Vec<InstanceView> {
        let mut ready: HashMap<String, bool> = HashMap::new();
        for row in &rows {
            if !ready.contains_key(&row.node_unique_name) {
                let is_ready = self.node_ready(&row.node_unique_name).await;
                ready.insert(row.node_unique_name.clone(), is_ready);
            }
        }
        rows.into_iter()
            .map(|row| {
                let node_ready = ready.get(&row.node_unique_name).copied().unwrap_or(false);
                self.view(row, node_ready)
            })
            .collect()
    }

    fn view(&self, row: AppInstance, node_ready: bool) -> InstanceView {
        let infos: Vec<ContainerInfo> = serde_json::from_str(&row.container_info)
            .unwrap_or_else(|e| {
                warn!(pod = %row.pod_name, error = %e, "stored container info is malformed");
                Vec::new()
            });
        let cache = self.read();
        let pod_status = match cache.pods.get(&row.pod_name) {
            Some(phase) if node_ready => phase.clone(),
            _ => UNKNOWN.to_string(),
        };
        let containers = infos
            .into_iter()
            .map(|info| {
                let state = cache
                    .containers
                    .get(&container_key(&row.pod_name, &info.name))
                    .filter(|_| node_ready);
                ContainerView {
                    status: state.map_or(RunState::Unknown, |s| s.status),
                    restart_count: state.map_or(0, |s| s.restart_count),
                    name: info.name,
                    image: info.image,
                }
            })
            .collect();
        drop(cache);
        InstanceView::from_row(row, pod_status, containers)
    }

    async fn node_ready(&self, unique_name: &str) -> bool {
        let status: Result<NodeStatusResp, _> = call(
            &self.inner.bus,
            modules::APP_INFORMER,
            modules::NODE_MANAGER,
            Operation::Get,
            RES_INNER_NODE_STATUS,
            &UniqueNameReq {
                unique_name: unique_name.to_string(),
            },
        )
        .await;
        match status {
            Ok(s) => s.node_status == NODE_READY,
            Err(e) => {
                debug!(node = %unique_name, error = %e, "node status unavailable");
                false
            }
        }
    }

    /// Cached lowercase phase of a pod.
    pub fn pod_status(&self, pod_name: &str) -> Option<String> {
        self.read().pods.get(pod_name).cloned()
    }
}

async fn next_event<T: Clone>(
    events: &mut Option<broadcast::Receiver<WatchEvent<T>>>,
) -> Result<WatchEvent<T>, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgefleet_core::config::FleetConfig;
    use edgefleet_core::{ListRequest, Quantity};

    use edgefleet_state::NewDaemonSet;

    use crate::container::pod_limits;
    use crate::container::tests::container;
    use crate::testing::{eventually, harness};
    use crate::types::DeployReq;

    async fn deployed(config: FleetConfig, workers: &[&str]) -> (crate::testing::Harness, u64) {
        let h = harness(config, workers).await;
        let g = h.group("g1", workers);
        let app = h.app("face-check", vec![container("main", 1.0, 128)]);
        h.manager
            .deploy_app(DeployReq {
                app_id: app,
                node_group_ids: vec![g],
            })
            .await
            .unwrap();
        (h, g)
    }

    #[tokio::test]
    async fn restart_rebuilds_daemon_sets_and_charges() {
        let (h, g) = deployed(FleetConfig::default(), &["edge-01", "edge-02"]).await;
        assert!(eventually(|| h.instance_count() == 2).await);

        let restarted = AppInformer::new(h.facade.clone(), h.store.clone(), h.bus.clone(), &h.config);
        restarted.start(h.shutdown_rx.clone()).await.unwrap();

        assert_eq!(h.daemon_set_count(), 1);
        assert_eq!(h.group_cpu(g), Quantity::from_units(2));
        assert_eq!(h.instance_count(), 2);
        assert_eq!(
            restarted.pod_status(&format!("face-check-{g}-edge-01")).as_deref(),
            Some("running")
        );
    }

    #[tokio::test]
    async fn out_of_band_workload_deletion_releases_charge() {
        let (h, g) = deployed(FleetConfig::default(), &["edge-01"]).await;
        h.facade
            .delete_workload(&format!("face-check-{g}"))
            .await
            .unwrap();

        assert!(eventually(|| h.daemon_set_count() == 0).await);
        assert!(eventually(|| h.group_cpu(g) == Quantity::ZERO).await);
        assert!(eventually(|| h.instance_count() == 0).await);
    }

    #[tokio::test]
    async fn pods_beyond_the_cap_are_not_recorded() {
        let mut config = FleetConfig::default();
        config.limits.max_pods = 1;
        let (h, _) = deployed(config, &["edge-01", "edge-02"]).await;

        assert!(eventually(|| h.instance_count() == 1).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.instance_count(), 1);
    }

    #[tokio::test]
    async fn states_are_unknown_on_a_node_that_is_not_ready() {
        let (h, _) = deployed(FleetConfig::default(), &["edge-01", "edge-02"]).await;
        assert!(eventually(|| h.instance_count() == 2).await);
        h.nodes.not_ready.lock().unwrap().insert("edge-02".to_string());

        let page = h.manager.list_instances(ListRequest::default()).await.unwrap();
        for view in page.items {
            let expected = if view.node_unique_name == "edge-02" {
                RunState::Unknown
            } else {
                RunState::Running
            };
            assert_eq!(view.containers[0].status, expected, "{}", view.pod_name);
            assert_eq!(view.pod_status == "unknown", expected == RunState::Unknown);
        }
    }

    #[tokio::test]
    async fn stuck_terminating_pods_are_force_deleted() {
        let (h, g) = deployed(FleetConfig::default(), &["edge-01"]).await;
        let pod = format!("face-check-{g}-edge-01");
        let informer = h.manager.informer().clone();
        assert!(eventually(|| informer.pod_status(&pod).is_some()).await);

        h.cluster.mark_pod_terminating(&pod, 1_000).unwrap();
        assert!(eventually(|| informer.read().terminating.contains_key(&pod)).await);

        // Still inside the grace window.
        informer.sweep_terminating(1_030).await;
        assert_eq!(h.cluster.pod(&pod).unwrap().deletion_timestamp, Some(1_000));

        informer.sweep_terminating(1_060).await;
        // The controller recreates the pod at once.
        assert_eq!(h.cluster.pod(&pod).unwrap().deletion_timestamp, None);
        assert!(eventually(|| !informer.read().terminating.contains_key(&pod)).await);
    }

    #[tokio::test]
    async fn resync_leaves_a_deploy_in_progress_alone() {
        let h = harness(FleetConfig::default(), &["edge-01"]).await;
        let g = h.group("g1", &["edge-01"]);
        let containers = vec![container("main", 1.0, 128)];
        let app = h.app("face-check", containers.clone());
        let informer = h.manager.informer().clone();
        let name = format!("face-check-{g}");

        // The steps of a deploy, with a relist between the row and the workload.
        let held = informer.hold(&name);
        h.store
            .run(|db| {
                db.insert_daemon_set(&NewDaemonSet {
                    daemon_set_name: name.clone(),
                    app_id: app,
                    node_group_id: g,
                    node_group_name: "g1".into(),
                })
            })
            .unwrap();
        informer.resync_workloads(Vec::new()).await;
        assert_eq!(h.daemon_set_count(), 1);

        let spec = h.manager.builder.build("face-check", app, &containers, g);
        h.facade.create_workload(&spec).await.unwrap();
        let per_pod = pod_limits(&containers, &h.config.labels);
        h.store
            .transaction(|db| db.adjust_group_resources(g, &per_pod, false))
            .unwrap();
        drop(held);

        tokio::time::sleep(Duration::from_millis(100)).await;
        informer.resync_workloads(vec![spec]).await;
        assert_eq!(h.daemon_set_count(), 1);
        assert_eq!(h.group_cpu(g), Quantity::from_units(1));
    }
}
