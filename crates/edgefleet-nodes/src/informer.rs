//! Node informer — mirrors cluster nodes into `node_infos` and caches them.
//!
//! Every non-master cluster node gets an unmanaged row the first time it is
//! seen. Group labels are reconciled against `node_relations` on every
//! event: stripped from unmanaged nodes, restored or removed on managed
//! ones. The cache backs the status and capacity reads of the node manager.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use edgefleet_bus::routes::{RES_NODE_CHANGED, modules};
use edgefleet_bus::{ModuleBus, Operation, notify};
use edgefleet_cluster::{ClusterFacade, ClusterNode, LabelPatch, WatchEvent};
use edgefleet_core::config::{FleetConfig, LabelsConfig};
use edgefleet_core::inner::{NodeChanged, NodeSummary};
use edgefleet_core::quantity::{CPU, MEMORY};
use edgefleet_core::{Quantity, ResourceList};
use edgefleet_state::{NewNode, NodeInfo, StateStore};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::status::NodeStatus;

#[derive(Clone)]
pub struct NodeInformer {
    inner: Arc<Inner>,
}

struct Inner {
    cluster: ClusterFacade,
    store: StateStore,
    bus: ModuleBus,
    labels: LabelsConfig,
    max_nodes: u64,
    resync: Duration,
    /// Cluster nodes by unique name.
    cache: RwLock<HashMap<String, ClusterNode>>,
}

enum Change {
    Added,
    Deleted,
}

impl NodeInformer {
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
                max_nodes: config.limits.max_nodes,
                resync: Duration::from_secs(config.informer.node_resync_secs.max(1)),
                cache: RwLock::new(HashMap::new()),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ClusterNode>> {
        self.inner.cache.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ClusterNode>> {
        self.inner.cache.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Purge unmanaged rows, run the first sync, then keep following the
    /// watch in the background until `shutdown` flips.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> NodeResult<JoinHandle<()>> {
        let purged = self.inner.store.run(|db| db.delete_unmanaged_nodes())?;
        let watch = self.inner.cluster.watch_nodes().await?;
        self.resync(watch.initial).await;
        info!(nodes = self.read().len(), purged, "node informer synced");

        let this = self.clone();
        Ok(tokio::spawn(async move {
            this.run(Some(watch.events), shutdown).await;
        }))
    }

    async fn run(
        self,
        mut events: Option<broadcast::Receiver<WatchEvent<ClusterNode>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(self.inner.resync);
        tick.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    if events.is_none() {
                        events = self.rewatch().await;
                    } else {
                        match self.inner.cluster.list_nodes().await {
                            Ok(nodes) => self.resync(nodes).await,
                            Err(e) => warn!(error = %e, "node resync failed"),
                        }
                    }
                }
                event = next_event(&mut events) => match event {
                    Ok(WatchEvent::Added(node)) | Ok(WatchEvent::Modified(node)) => self.observe(node).await,
                    Ok(WatchEvent::Deleted(node)) => self.forget(&node).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "node watch lagged, relisting");
                        events = self.rewatch().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("node watch closed, relisting");
                        events = self.rewatch().await;
                    }
                },
            }
        }

        debug!("node informer stopped");
    }

    async fn rewatch(&self) -> Option<broadcast::Receiver<WatchEvent<ClusterNode>>> {
        match self.inner.cluster.watch_nodes().await {
            Ok(watch) => {
                self.resync(watch.initial).await;
                Some(watch.events)
            }
            Err(e) => {
                warn!(error = %e, "node watch unavailable, retrying on next resync");
                None
            }
        }
    }

    /// Bring the cache in line with a full listing.
    async fn resync(&self, nodes: Vec<ClusterNode>) {
        let listed: HashMap<String, ClusterNode> = nodes
            .into_iter()
            .filter(|n| !self.inner.labels.is_master(&n.labels))
            .map(|n| (n.name.clone(), n))
            .collect();
        let gone: Vec<ClusterNode> = self
            .read()
            .values()
            .filter(|n| !listed.contains_key(&n.name))
            .cloned()
            .collect();
        for node in gone {
            self.forget(&node).await;
        }
        for node in listed.into_values() {
            self.observe(node).await;
        }
    }

    async fn observe(&self, node: ClusterNode) {
        if self.inner.labels.is_master(&node.labels) {
            debug!(node = %node.name, "skipping master node");
            return;
        }
        let is_new = self
            .write()
            .insert(node.name.clone(), node.clone())
            .is_none();

        match self.reconcile(&node).await {
            Ok(row) => {
                if is_new {
                    self.report(Change::Added, &node, row.as_ref()).await;
                }
            }
            Err(e) => warn!(node = %node.name, error = %e, "node reconcile failed"),
        }
    }

    async fn forget(&self, node: &ClusterNode) {
        let removed = self.write().remove(&node.name).is_some();
        let row = match self.inner.store.run(|db| db.find_node_by_unique_name(&node.name)) {
            Ok(row) => row,
            Err(e) => {
                warn!(node = %node.name, error = %e, "node lookup failed");
                None
            }
        };
        if let Some(row) = row.as_ref().filter(|r| !r.is_managed) {
            if let Err(e) = self.inner.store.run(|db| db.delete_node(row.id)) {
                warn!(node = %node.name, error = %e, "failed to drop unmanaged node");
            }
        }
        if removed {
            debug!(node = %node.name, "node left the cluster");
            self.report(Change::Deleted, node, row.as_ref()).await;
        }
    }

    /// Make sure a row exists and keep its address current. Group labels
    /// are brought in line with the node's relations: none while it is
    /// unmanaged, exactly its groups once managed.
    async fn reconcile(&self, node: &ClusterNode) -> NodeResult<Option<NodeInfo>> {
        let Some(row) = self.ensure_row(node)? else {
            return Ok(None);
        };
        let labels = &self.inner.labels;
        let wanted: BTreeSet<String> = if row.is_managed {
            self.inner
                .store
                .run(|db| db.node_groups(row.id))?
                .iter()
                .map(|g| labels.group_label(g.id))
                .collect()
        } else {
            BTreeSet::new()
        };
        let patch = LabelPatch {
            add: wanted
                .iter()
                .filter(|k| !node.labels.contains_key(*k))
                .map(|k| (k.clone(), String::new()))
                .collect(),
            remove: node
                .labels
                .keys()
                .filter(|k| labels.is_group_label(k) && !wanted.contains(*k))
                .cloned()
                .collect(),
        };
        if !patch.is_empty() {
            self.inner
                .cluster
                .patch_node_labels(&node.name, &patch)
                .await?;
            info!(
                node = %node.name,
                managed = row.is_managed,
                added = patch.add.len(),
                removed = patch.remove.len(),
                "group labels reconciled"
            );
        }
        Ok(Some(row))
    }

    fn ensure_row(&self, node: &ClusterNode) -> NodeResult<Option<NodeInfo>> {
        let store = &self.inner.store;
        if let Some(row) = store.run(|db| db.find_node_by_unique_name(&node.name))? {
            if !node.internal_ip.is_empty() && row.ip_address != node.internal_ip {
                store.run(|db| db.update_node_address(row.id, &node.internal_ip))?;
            }
            return Ok(Some(row));
        }

        if store.run(|db| db.count_nodes())? >= self.inner.max_nodes {
            warn!(node = %node.name, max = self.inner.max_nodes, "node count at maximum, not recording node");
            return Ok(None);
        }
        let new = NewNode {
            node_name: node.name.clone(),
            unique_name: node.name.clone(),
            serial_number: self
                .inner
                .labels
                .serial_number(&node.labels)
                .unwrap_or_default()
                .to_string(),
            ip_address: node.internal_ip.clone(),
            description: String::new(),
            is_managed: false,
        };
        match store.run(|db| db.insert_node(&new)) {
            Ok(id) => info!(id, node = %node.name, "unmanaged node recorded"),
            Err(e) if e.is_unique_violation() => {
                debug!(node = %node.name, "node row already present");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(store.run(|db| db.find_node_by_unique_name(&node.name))?)
    }

    /// Tell the config manager about nodes that carry a serial number, so
    /// certificates can follow them.
    async fn report(&self, change: Change, node: &ClusterNode, row: Option<&NodeInfo>) {
        let Some(serial) = self.inner.labels.serial_number(&node.labels) else {
            return;
        };
        let summary = NodeSummary {
            id: row.map(|r| r.id).unwrap_or_default(),
            node_name: row.map_or_else(|| node.name.clone(), |r| r.node_name.clone()),
            unique_name: node.name.clone(),
            serial_number: serial.to_string(),
            ip_address: node.internal_ip.clone(),
            is_managed: row.is_some_and(|r| r.is_managed),
        };
        let body = match change {
            Change::Added => NodeChanged {
                added: vec![summary],
                ..Default::default()
            },
            Change::Deleted => NodeChanged {
                deleted: vec![summary],
                ..Default::default()
            },
        };
        if let Err(e) = notify(
            &self.inner.bus,
            modules::NODE_INFORMER,
            modules::CONFIG_MANAGER,
            Operation::Update,
            RES_NODE_CHANGED,
            &body,
        )
        .await
        {
            debug!(node = %node.name, error = %e, "node change not delivered");
        }
    }

    /// Record rows for cluster nodes the watch has not delivered yet.
    pub async fn auto_add(&self) -> NodeResult<()> {
        let nodes = self.inner.cluster.list_nodes().await?;
        for node in nodes {
            if self.inner.labels.is_master(&node.labels) {
                continue;
            }
            self.ensure_row(&node)?;
        }
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn node(&self, unique_name: &str) -> Option<ClusterNode> {
        self.read().get(unique_name).cloned()
    }

    /// Cached status; a node the informer has not seen is `unknown`.
    pub fn status(&self, unique_name: &str) -> NodeStatus {
        self.read()
            .get(unique_name)
            .map_or(NodeStatus::Unknown, NodeStatus::of)
    }

    /// `cpu`, `memory` and the accelerator (zero when absent) a node offers.
    pub fn allocatable(&self, unique_name: &str) -> NodeResult<ResourceList> {
        let node = self
            .node(unique_name)
            .ok_or_else(|| NodeError::NotFound(format!("cluster node {unique_name}")))?;
        let mut list = ResourceList::new();
        for key in [CPU, MEMORY] {
            if let Some(q) = node.allocatable.get(key) {
                list.set(key, q);
            }
        }
        let npu = &self.inner.labels.npu_resource;
        list.set(npu, node.allocatable.get(npu).unwrap_or(Quantity::ZERO));
        Ok(list)
    }

    /// Allocatable minus the requests of every pod placed on the node.
    pub async fn available(&self, unique_name: &str) -> NodeResult<ResourceList> {
        let mut available = self.allocatable(unique_name)?;
        for key in [CPU, MEMORY] {
            if !available.contains(key) {
                return Err(NodeError::CheckFailed(format!(
                    "node {unique_name} reports no allocatable {key}"
                )));
            }
        }
        let used = self
            .inner
            .cluster
            .node_allocated_resources(unique_name)
            .await?;
        available.sub(&used);
        Ok(available)
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<WatchEvent<ClusterNode>>>,
) -> Result<WatchEvent<ClusterNode>, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
