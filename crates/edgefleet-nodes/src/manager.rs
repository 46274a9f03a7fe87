//! Node manager — nodes, node groups, membership, and group capacity.
//!
//! The database is written first and the cluster second. Group labels on
//! cluster nodes follow the relation rows; the informer repairs any label
//! a failed patch left behind.
//!
//! Each group carries an accumulator, `resources_request`, equal to the
//! per-pod limits of every application deployed into the group times the
//! group's member count. Membership changes recompute it from the app
//! manager's view of the group.

use std::collections::{BTreeSet, HashMap};

use edgefleet_bus::routes::{
    RES_EDGE_NODE_DELETE, RES_INNER_GROUP_POD_RESOURCES, RES_INNER_INSTANCE_COUNT_BY_GROUPS,
    modules,
};
use edgefleet_bus::{Message, ModuleBus, Operation, call};
use edgefleet_cluster::{ClusterFacade, LabelPatch, Labels};
use edgefleet_core::config::{FleetConfig, LabelsConfig, LimitsConfig};
use edgefleet_core::inner::{
    CheckGroupResourcesReq, GroupAppCounts, GroupIdReq, GroupIdsReq, GroupNodesResp, GroupRef,
    NodeIdReq, NodeRef, NodeStatusResp, SoftwareReport, UniqueNameReq, UpdateGroupResourcesReq,
};
use edgefleet_core::validate::{BATCH_MAX_COUNT, check_count, check_id_batch};
use edgefleet_core::{BatchResp, Field, ListRequest, Page, ResourceList, Validator};
use edgefleet_state::{Db, NewNode, NodeGroup, NodeInfo, StateStore};
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::informer::NodeInformer;
use crate::types::*;

const UNIQUE_NAME_MAX_LEN: usize = 255;

pub struct NodeManager {
    store: StateStore,
    cluster: ClusterFacade,
    bus: ModuleBus,
    informer: NodeInformer,
    labels: LabelsConfig,
    limits: LimitsConfig,
    validator: Validator,
}

impl NodeManager {
    pub fn new(
        store: StateStore,
        cluster: ClusterFacade,
        bus: ModuleBus,
        informer: NodeInformer,
        config: &FleetConfig,
    ) -> NodeResult<Self> {
        let validator = Validator::new()
            .map_err(|e| NodeError::Invalid(format!("validation rules: {e}")))?;
        Ok(Self {
            store,
            cluster,
            bus,
            informer,
            labels: config.labels.clone(),
            limits: config.limits.clone(),
            validator,
        })
    }

    pub fn informer(&self) -> &NodeInformer {
        &self.informer
    }

    // ── Nodes ──────────────────────────────────────────────────────

    pub fn create_node(&self, req: CreateNodeReq) -> NodeResult<u64> {
        self.validator.check(Field::NodeName, &req.node_name)?;
        self.validator.check(Field::Description, &req.description)?;
        if req.unique_name.is_empty() || req.unique_name.len() > UNIQUE_NAME_MAX_LEN {
            return Err(NodeError::Invalid(format!(
                "uniqueName must be 1..={UNIQUE_NAME_MAX_LEN} characters"
            )));
        }
        let max = self.limits.max_nodes;
        let id = self.store.transaction(|db| -> NodeResult<u64> {
            let count = db.count_nodes()?;
            if count >= max {
                return Err(NodeError::CountExceeded {
                    what: "node",
                    count: count + 1,
                    max,
                });
            }
            db.insert_node(&NewNode {
                node_name: req.node_name.clone(),
                unique_name: req.unique_name.clone(),
                description: req.description.clone(),
                is_managed: true,
                ..Default::default()
            })
            .map_err(NodeError::duplicate_on(&req.node_name))
        })?;
        info!(id, node_name = %req.node_name, unique_name = %req.unique_name, "node created");
        Ok(id)
    }

    pub fn modify_node(&self, req: ModifyNodeReq) -> NodeResult<()> {
        self.validator.check(Field::NodeName, &req.node_name)?;
        self.validator.check(Field::Description, &req.description)?;
        self.store.transaction(|db| -> NodeResult<()> {
            let node = db.get_node(req.node_id)?;
            if !node.is_managed {
                return Err(NodeError::Invalid(format!("node {} is not managed", node.id)));
            }
            db.update_node(node.id, &req.node_name, &req.description)
                .map_err(NodeError::duplicate_on(&req.node_name))?;
            Ok(())
        })?;
        info!(node_id = req.node_id, node_name = %req.node_name, "node modified");
        Ok(())
    }

    /// Take an unmanaged node under management and join the given groups.
    /// Repeating the call with the same arguments on the now managed node
    /// is a no-op.
    pub async fn promote_node(&self, req: PromoteNodeReq) -> NodeResult<()> {
        self.validator.check(Field::NodeName, &req.name)?;
        self.validator.check(Field::Description, &req.description)?;
        if !req.group_ids.is_empty() {
            check_id_batch("groupIds", &req.group_ids)?;
        }
        check_count(
            "groupIds",
            req.group_ids.len(),
            usize::try_from(self.limits.max_groups_per_node).unwrap_or(usize::MAX),
        )?;

        let node = self.store.run(|db| db.get_node(req.node_id))?;
        if node.is_managed {
            let current: BTreeSet<u64> = self
                .store
                .run(|db| db.relations_of_node(node.id))?
                .into_iter()
                .map(|r| r.group_id)
                .collect();
            let wanted: BTreeSet<u64> = req.group_ids.iter().copied().collect();
            if node.node_name == req.name
                && node.description == req.description
                && current == wanted
            {
                debug!(node_id = node.id, "node already managed with these settings");
                return Ok(());
            }
            return Err(NodeError::Invalid(format!("node {} is already managed", node.id)));
        }

        let pod_resources = self.pod_resources_of(&req.group_ids).await?;
        self.store.transaction(|db| -> NodeResult<()> {
            let promoted = db
                .promote_node(node.id, &req.name, &req.description)
                .map_err(NodeError::duplicate_on(&req.name))?;
            if promoted == 0 {
                return Err(NodeError::Invalid(format!("node {} is already managed", node.id)));
            }
            for group_id in &req.group_ids {
                self.join(db, *group_id, &[node.id], &pod_resources)?;
            }
            Ok(())
        })?;

        if let Err(e) = self.label_nodes(&[node.clone()], &req.group_ids).await {
            for group_id in &req.group_ids {
                self.leave_after_failure(*group_id, &[node.id], &pod_resources);
            }
            return Err(e);
        }
        info!(node_id = node.id, name = %req.name, groups = ?req.group_ids, "node promoted");
        Ok(())
    }

    pub async fn batch_delete_nodes(&self, req: NodeIdsReq) -> NodeResult<BatchResp> {
        check_id_batch("nodeIds", &req.node_ids)?;
        let mut batch = BatchResp::default();
        for id in req.node_ids {
            match self.delete_node(id).await {
                Ok(()) => batch.succeed(id),
                Err(e) => {
                    warn!(node_id = id, error = %e, "node delete failed");
                    batch.fail(id, e.to_string());
                }
            }
        }
        Ok(batch)
    }

    /// Delete one managed node. Relations are removed with it; only
    /// membership in a group that hosts deployed applications blocks the
    /// delete, not membership as such.
    async fn delete_node(&self, id: u64) -> NodeResult<()> {
        let node = self.store.run(|db| db.get_node(id))?;
        if !node.is_managed {
            return Err(NodeError::Invalid(format!("node {id} is not managed")));
        }
        let groups = self.store.run(|db| db.node_groups(id))?;
        if !groups.is_empty() {
            let counts = self.app_counts(groups.iter().map(|g| g.id).collect()).await?;
            if let Some(busy) = groups.iter().find(|g| hosts_apps(&counts, g.id)) {
                return Err(NodeError::CheckFailed(format!(
                    "node {} belongs to node group {} which has deployed applications",
                    node.node_name, busy.group_name
                )));
            }
        }
        self.store.run(|db| db.delete_node(id))?;
        self.cluster.delete_node(&node.unique_name).await?;
        self.notify_deleted(&node).await;
        info!(node_id = id, unique_name = %node.unique_name, "node deleted");
        Ok(())
    }

    pub async fn batch_delete_unmanaged_nodes(&self, req: NodeIdsReq) -> NodeResult<BatchResp> {
        check_id_batch("nodeIds", &req.node_ids)?;
        let mut batch = BatchResp::default();
        for id in req.node_ids {
            match self.delete_unmanaged_node(id).await {
                Ok(()) => batch.succeed(id),
                Err(e) => {
                    warn!(node_id = id, error = %e, "unmanaged node delete failed");
                    batch.fail(id, e.to_string());
                }
            }
        }
        Ok(batch)
    }

    async fn delete_unmanaged_node(&self, id: u64) -> NodeResult<()> {
        let node = self.store.run(|db| db.get_node(id))?;
        if node.is_managed {
            return Err(NodeError::Invalid(format!("node {id} is managed")));
        }
        self.store.run(|db| db.delete_node(id))?;
        self.cluster.delete_node(&node.unique_name).await?;
        self.notify_deleted(&node).await;
        info!(node_id = id, unique_name = %node.unique_name, "unmanaged node deleted");
        Ok(())
    }

    /// Tell the agent on a deleted node that it no longer belongs to the
    /// fleet. Nodes without a serial number cannot be addressed.
    async fn notify_deleted(&self, node: &NodeInfo) {
        if node.serial_number.is_empty() {
            debug!(node_id = node.id, "no serial number, delete notice skipped");
            return;
        }
        let sent = match Message::with_body(
            modules::NODE_MANAGER,
            modules::EDGE_CONNECTOR,
            Operation::Delete,
            RES_EDGE_NODE_DELETE,
            &format!("delete:{}", node.serial_number),
        ) {
            Ok(msg) => self.bus.send(msg.with_node_id(&node.serial_number)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(node_id = node.id, serial = %node.serial_number, error = %e, "delete notice not sent");
        }
    }

    // ── Node groups ────────────────────────────────────────────────

    pub fn create_group(&self, req: CreateGroupReq) -> NodeResult<u64> {
        self.validator.check(Field::NodeGroupName, &req.group_name)?;
        self.validator.check(Field::Description, &req.description)?;
        let max = self.limits.max_node_groups;
        let id = self.store.transaction(|db| -> NodeResult<u64> {
            let count = db.count_groups()?;
            if count >= max {
                return Err(NodeError::CountExceeded {
                    what: "node group",
                    count: count + 1,
                    max,
                });
            }
            db.insert_group(&req.group_name, &req.description)
                .map_err(NodeError::duplicate_on(&req.group_name))
        })?;
        info!(id, group_name = %req.group_name, "node group created");
        Ok(id)
    }

    pub fn modify_group(&self, req: ModifyGroupReq) -> NodeResult<()> {
        self.validator.check(Field::NodeGroupName, &req.group_name)?;
        self.validator.check(Field::Description, &req.description)?;
        let updated = self
            .store
            .run(|db| db.update_group(req.group_id, &req.group_name, &req.description))
            .map_err(NodeError::duplicate_on(&req.group_name))?;
        if updated == 0 {
            return Err(NodeError::NotFound(format!("node group {}", req.group_id)));
        }
        info!(group_id = req.group_id, group_name = %req.group_name, "node group modified");
        Ok(())
    }

    pub async fn batch_delete_groups(&self, req: GroupIdsReq) -> NodeResult<BatchResp> {
        check_id_batch("groupIds", &req.group_ids)?;
        let counts = self.app_counts(req.group_ids.clone()).await?;
        let mut batch = BatchResp::default();
        for id in req.group_ids {
            if hosts_apps(&counts, id) {
                batch.fail(id, format!("node group {id} hosts applications"));
                continue;
            }
            match self.delete_group(id).await {
                Ok(()) => batch.succeed(id),
                Err(e) => {
                    warn!(group_id = id, error = %e, "node group delete failed");
                    batch.fail(id, e.to_string());
                }
            }
        }
        Ok(batch)
    }

    async fn delete_group(&self, id: u64) -> NodeResult<()> {
        let members = self.store.transaction(|db| -> NodeResult<Vec<NodeInfo>> {
            db.get_group(id)?;
            let members = db.group_members(id)?;
            db.delete_group(id)?;
            Ok(members)
        })?;
        self.unlabel_nodes(&members, id).await;
        info!(group_id = id, members = members.len(), "node group deleted");
        Ok(())
    }

    // ── Relations ──────────────────────────────────────────────────

    /// Join nodes to a group, all or nothing.
    pub async fn add_relation(&self, req: AddRelationReq) -> NodeResult<()> {
        check_id_batch("nodeIds", &req.node_ids)?;
        let pod_resources = self.pod_resources_of(&[req.group_id]).await?;
        let nodes = self.store.transaction(|db| -> NodeResult<Vec<NodeInfo>> {
            self.join(db, req.group_id, &req.node_ids, &pod_resources)?;
            req.node_ids
                .iter()
                .map(|id| db.get_node(*id).map_err(NodeError::from))
                .collect()
        })?;

        if let Err(e) = self.label_nodes(&nodes, &[req.group_id]).await {
            self.leave_after_failure(req.group_id, &req.node_ids, &pod_resources);
            return Err(e);
        }
        info!(group_id = req.group_id, nodes = ?req.node_ids, "nodes joined group");
        Ok(())
    }

    /// Remove memberships pair by pair. The whole batch is refused if any
    /// group involved has applications deployed.
    pub async fn delete_relation(&self, req: DeleteRelationReq) -> NodeResult<RelationBatch> {
        if req.relations.is_empty() {
            return Err(NodeError::Invalid("relations must not be empty".to_string()));
        }
        check_count("relations", req.relations.len(), BATCH_MAX_COUNT)?;
        let mut seen = BTreeSet::new();
        if let Some(dup) = req.relations.iter().find(|p| !seen.insert(**p)) {
            return Err(NodeError::Invalid(format!(
                "duplicate relation group {} node {}",
                dup.group_id, dup.node_id
            )));
        }

        let group_ids: Vec<u64> = req
            .relations
            .iter()
            .map(|p| p.group_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let counts = self.app_counts(group_ids.clone()).await?;
        if let Some(busy) = group_ids.iter().find(|g| hosts_apps(&counts, **g)) {
            return Err(NodeError::CheckFailed(format!(
                "node group {busy} has deployed applications"
            )));
        }
        let pod_resources = self.pod_resources_of(&group_ids).await?;

        let mut batch = RelationBatch::default();
        for pair in req.relations {
            let removed = self.store.transaction(|db| -> NodeResult<Option<NodeInfo>> {
                let node = db.get_node(pair.node_id)?;
                if !db.delete_relation(pair.group_id, pair.node_id)? {
                    return Ok(None);
                }
                self.recompute(db, pair.group_id, &pod_resources)?;
                Ok(Some(node))
            });
            match removed {
                Ok(Some(node)) => {
                    self.unlabel_nodes(&[node], pair.group_id).await;
                    batch.success.push(pair);
                }
                Ok(None) => batch.fail(pair, "relation not found"),
                Err(e) => batch.fail(pair, e.to_string()),
            }
        }
        info!(
            removed = batch.success.len(),
            failed = batch.failed.len(),
            "node relations deleted"
        );
        Ok(batch)
    }

    /// Insert relations for `node_ids`, enforce the membership caps, and
    /// rescale the accumulator. Runs inside the caller's transaction.
    fn join(
        &self,
        db: &Db<'_>,
        group_id: u64,
        node_ids: &[u64],
        pod_resources: &HashMap<u64, ResourceList>,
    ) -> NodeResult<()> {
        let group = db.get_group(group_id)?;
        let members = db.count_group_members(group_id)? + node_ids.len() as u64;
        if members > self.limits.max_nodes_per_group {
            return Err(NodeError::CountExceeded {
                what: "nodes in group",
                count: members,
                max: self.limits.max_nodes_per_group,
            });
        }
        for node_id in node_ids {
            let node = db.get_node(*node_id)?;
            if !node.is_managed {
                return Err(NodeError::Invalid(format!("node {node_id} is not managed")));
            }
            let groups = db.count_node_groups(*node_id)? + 1;
            if groups > self.limits.max_groups_per_node {
                return Err(NodeError::CountExceeded {
                    what: "groups of node",
                    count: groups,
                    max: self.limits.max_groups_per_node,
                });
            }
            db.insert_relation(group_id, *node_id).map_err(|e| {
                if e.is_unique_violation() {
                    NodeError::Duplicate(format!(
                        "node {} in node group {}",
                        node.node_name, group.group_name
                    ))
                } else {
                    e.into()
                }
            })?;
        }
        self.recompute(db, group_id, pod_resources)?;
        self.post_check(db, node_ids)
    }

    fn recompute(
        &self,
        db: &Db<'_>,
        group_id: u64,
        pod_resources: &HashMap<u64, ResourceList>,
    ) -> NodeResult<()> {
        let members = db.count_group_members(group_id)?;
        let per_pod = pod_resources.get(&group_id).cloned().unwrap_or_default();
        db.set_group_resources(group_id, &per_pod.scaled(members))?;
        Ok(())
    }

    /// Undo a join whose cluster labels could not be applied.
    fn leave_after_failure(
        &self,
        group_id: u64,
        node_ids: &[u64],
        pod_resources: &HashMap<u64, ResourceList>,
    ) {
        let result = self.store.transaction(|db| -> NodeResult<()> {
            for node_id in node_ids {
                db.delete_relation(group_id, *node_id)?;
            }
            self.recompute(db, group_id, pod_resources)
        });
        if let Err(e) = result {
            warn!(group_id, error = %e, "failed to roll back node relations");
        }
    }

    /// For each node, the per-pod share of every group it belongs to must
    /// fit its allocatable resources.
    fn post_check(&self, db: &Db<'_>, node_ids: &[u64]) -> NodeResult<()> {
        for node_id in node_ids {
            let node = db.get_node(*node_id)?;
            let mut committed = ResourceList::new();
            for group in db.node_groups(*node_id)? {
                let members = db.count_group_members(group.id)?.max(1);
                committed.add(&group.resources_request.divided(members));
            }
            if committed.is_empty() {
                continue;
            }
            // Nodes not reporting to the cluster are checked at admission.
            let Ok(allocatable) = self.informer.allocatable(&node.unique_name) else {
                continue;
            };
            if let Some(dim) = committed.first_shortfall(&allocatable) {
                return Err(NodeError::CheckFailed(format!(
                    "node {} cannot hold the applications of its node groups: insufficient {dim}",
                    node.unique_name
                )));
            }
        }
        Ok(())
    }

    // ── Cluster labels ─────────────────────────────────────────────

    async fn label_nodes(&self, nodes: &[NodeInfo], group_ids: &[u64]) -> NodeResult<()> {
        if group_ids.is_empty() {
            return Ok(());
        }
        let add: Labels = group_ids
            .iter()
            .map(|g| (self.labels.group_label(*g), String::new()))
            .collect();
        let patch = LabelPatch {
            add,
            remove: Vec::new(),
        };
        let mut done: Vec<&str> = Vec::new();
        for node in nodes {
            match self.cluster.patch_node_labels(&node.unique_name, &patch).await {
                Ok(_) => done.push(&node.unique_name),
                Err(e) if e.is_not_found() => {
                    debug!(node = %node.unique_name, "node not in cluster yet, labels applied on join");
                }
                Err(e) => {
                    let undo = LabelPatch::remove(patch.add.keys().cloned());
                    for name in done {
                        if let Err(e) = self.cluster.patch_node_labels(name, &undo).await {
                            warn!(node = %name, error = %e, "failed to revert group labels");
                        }
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    async fn unlabel_nodes(&self, nodes: &[NodeInfo], group_id: u64) {
        let patch = LabelPatch::remove([self.labels.group_label(group_id)]);
        for node in nodes {
            match self.cluster.patch_node_labels(&node.unique_name, &patch).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(node = %node.unique_name, group_id, error = %e, "failed to strip group label");
                }
            }
        }
    }

    // ── Views ──────────────────────────────────────────────────────

    pub fn list_nodes(&self, req: ListRequest) -> NodeResult<Page<NodeView>> {
        self.list_by_managed(true, req)
    }

    /// Unmanaged nodes, after recording any cluster node still missing a row.
    pub async fn list_unmanaged_nodes(&self, req: ListRequest) -> NodeResult<Page<NodeView>> {
        self.informer.auto_add().await?;
        self.list_by_managed(false, req)
    }

    fn list_by_managed(&self, managed: bool, req: ListRequest) -> NodeResult<Page<NodeView>> {
        let query = req.to_query()?;
        self.store.run(|db| {
            let page = db.list_nodes(managed, &query)?;
            let items = page
                .items
                .into_iter()
                .map(|n| self.node_view(db, n))
                .collect::<NodeResult<Vec<_>>>()?;
            Ok(Page {
                total: page.total,
                items,
            })
        })
    }

    fn node_view(&self, db: &Db<'_>, node: NodeInfo) -> NodeResult<NodeView> {
        let groups = db.node_groups(node.id)?;
        let node_status = self.informer.status(&node.unique_name);
        let allocatable = self
            .informer
            .allocatable(&node.unique_name)
            .map(|list| ResourceView::from_list(&list, &self.labels))
            .unwrap_or_default();
        let node_group = groups
            .iter()
            .map(|g| g.group_name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Ok(NodeView {
            node,
            node_status,
            allocatable,
            node_group,
        })
    }

    pub async fn node_detail(&self, req: NodeIdReq) -> NodeResult<NodeDetail> {
        let (view, groups) = self.store.run(|db| -> NodeResult<_> {
            let node = db.get_node(req.node_id)?;
            let groups = db.node_groups(node.id)?;
            Ok((self.node_view(db, node)?, groups))
        })?;
        let available = match self.informer.available(&view.node.unique_name).await {
            Ok(list) => Some(ResourceView::from_list(&list, &self.labels)),
            Err(e) => {
                debug!(node = %view.node.unique_name, error = %e, "no available resources");
                None
            }
        };
        Ok(NodeDetail {
            view,
            available,
            node_groups: groups
                .into_iter()
                .map(|g| GroupRefView {
                    group_id: g.id,
                    group_name: g.group_name,
                })
                .collect(),
        })
    }

    pub fn list_groups(&self, req: ListRequest) -> NodeResult<Page<GroupView>> {
        let query = req.to_query()?;
        self.store.run(|db| {
            let page = db.list_groups(&query)?;
            let items = page
                .items
                .into_iter()
                .map(|g| group_view(db, g))
                .collect::<NodeResult<Vec<_>>>()?;
            Ok(Page {
                total: page.total,
                items,
            })
        })
    }

    pub fn group_detail(&self, req: GroupIdReq) -> NodeResult<GroupDetail> {
        self.store.run(|db| {
            let group = db.get_group(req.group_id)?;
            let allocated = ResourceView::from_list(&group.resources_request, &self.labels);
            let nodes = db
                .group_members(group.id)?
                .into_iter()
                .map(|n| self.node_view(db, n))
                .collect::<NodeResult<Vec<_>>>()?;
            Ok(GroupDetail {
                view: group_view(db, group)?,
                allocated,
                nodes,
            })
        })
    }

    pub fn node_statistics(&self) -> NodeResult<NodeStatistics> {
        let nodes = self.store.run(|db| db.all_nodes())?;
        let mut stats = NodeStatistics::default();
        for node in nodes.iter().filter(|n| n.is_managed) {
            stats.count(self.informer.status(&node.unique_name));
        }
        Ok(stats)
    }

    pub fn group_statistics(&self) -> NodeResult<GroupStatistics> {
        self.store.run(|db| {
            let groups = db
                .all_groups()?
                .into_iter()
                .map(|g| -> NodeResult<GroupMemberCount> {
                    Ok(GroupMemberCount {
                        node_count: db.count_group_members(g.id)?,
                        group_id: g.id,
                        group_name: g.group_name,
                    })
                })
                .collect::<NodeResult<Vec<_>>>()?;
            Ok(GroupStatistics {
                total: groups.len() as u64,
                groups,
            })
        })
    }

    // ── Inner operations ───────────────────────────────────────────

    pub fn node_by_unique_name(&self, req: UniqueNameReq) -> NodeResult<NodeRef> {
        let node = self
            .store
            .run(|db| db.find_node_by_unique_name(&req.unique_name))?
            .ok_or_else(|| NodeError::NotFound(format!("node {}", req.unique_name)))?;
        Ok(NodeRef {
            node_id: node.id,
            node_name: node.node_name,
        })
    }

    pub fn node_by_id(&self, req: NodeIdReq) -> NodeResult<NodeInfo> {
        Ok(self.store.run(|db| db.get_node(req.node_id))?)
    }

    pub fn node_status(&self, req: UniqueNameReq) -> NodeStatusResp {
        NodeStatusResp {
            node_status: self.informer.status(&req.unique_name).as_str().to_string(),
        }
    }

    pub fn nodes_in_group(&self, req: GroupIdReq) -> NodeResult<GroupNodesResp> {
        let node_ids = self.store.run(|db| -> NodeResult<Vec<u64>> {
            db.get_group(req.group_id)?;
            Ok(db
                .relations_of_group(req.group_id)?
                .into_iter()
                .map(|r| r.node_id)
                .collect())
        })?;
        Ok(GroupNodesResp { node_ids })
    }

    pub fn all_nodes(&self) -> NodeResult<Vec<NodeInfo>> {
        Ok(self.store.run(|db| db.all_nodes())?)
    }

    pub fn groups_by_ids(&self, req: GroupIdsReq) -> NodeResult<Vec<GroupRef>> {
        let groups = self.store.run(|db| db.groups_by_ids(&req.group_ids))?;
        Ok(groups
            .into_iter()
            .map(|g| GroupRef {
                group_id: g.id,
                group_name: g.group_name,
            })
            .collect())
    }

    /// Every member must have `resources` free beyond what its pods
    /// already request.
    pub async fn check_group_resources(&self, req: CheckGroupResourcesReq) -> NodeResult<()> {
        let (group, members) = self.store.run(|db| -> NodeResult<_> {
            Ok((db.get_group(req.group_id)?, db.group_members(req.group_id)?))
        })?;
        for node in members {
            let available = match self.informer.available(&node.unique_name).await {
                Ok(available) => available,
                Err(NodeError::NotFound(_)) => {
                    return Err(NodeError::CheckFailed(format!(
                        "node {} in node group {} is not reporting resources",
                        node.unique_name, group.group_name
                    )));
                }
                Err(e) => return Err(e),
            };
            if let Some(dim) = req.resources.first_shortfall(&available) {
                return Err(NodeError::CheckFailed(format!(
                    "node {} in node group {} has insufficient {dim}",
                    node.unique_name, group.group_name
                )));
            }
        }
        Ok(())
    }

    /// Add or subtract per-pod `resources` scaled by the member count. An
    /// addition that overcommits any member is rolled back.
    pub fn update_group_resources(&self, req: UpdateGroupResourcesReq) -> NodeResult<()> {
        self.store.transaction(|db| {
            let adjusted =
                db.adjust_group_resources(req.group_id, &req.resources, req.is_undeploy)?;
            if adjusted.is_none() {
                if req.is_undeploy {
                    return Ok(());
                }
                return Err(NodeError::NotFound(format!("node group {}", req.group_id)));
            }
            if !req.is_undeploy {
                let node_ids: Vec<u64> = db
                    .relations_of_group(req.group_id)?
                    .into_iter()
                    .map(|r| r.node_id)
                    .collect();
                self.post_check(db, &node_ids)?;
            }
            debug!(group_id = req.group_id, undeploy = req.is_undeploy, "group resources updated");
            Ok(())
        })
    }

    pub fn update_node_software(&self, report: SoftwareReport) -> NodeResult<()> {
        let node = self
            .store
            .run(|db| db.find_node_by_serial(&report.serial_number))?
            .ok_or_else(|| {
                NodeError::NotFound(format!("node with serial number {}", report.serial_number))
            })?;
        let json = serde_json::to_string(&report.software_info)
            .map_err(|e| NodeError::Invalid(format!("softwareInfo: {e}")))?;
        self.store.run(|db| db.update_node_software(node.id, &json))?;
        debug!(node_id = node.id, "node software info updated");
        Ok(())
    }

    pub fn node_software(&self, req: NodeIdReq) -> NodeResult<Vec<serde_json::Value>> {
        let node = self.store.run(|db| db.get_node(req.node_id))?;
        if node.software_info.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&node.software_info).unwrap_or_else(|e| {
            warn!(node_id = node.id, error = %e, "stored software info is malformed");
            Vec::new()
        }))
    }

    // ── App manager queries ────────────────────────────────────────

    async fn app_counts(&self, group_ids: Vec<u64>) -> NodeResult<GroupAppCounts> {
        Ok(call(
            &self.bus,
            modules::NODE_MANAGER,
            modules::APP_MANAGER,
            Operation::Get,
            RES_INNER_INSTANCE_COUNT_BY_GROUPS,
            &GroupIdsReq { group_ids },
        )
        .await?)
    }

    /// Per-pod limits of everything deployed into each group.
    async fn pod_resources_of(&self, group_ids: &[u64]) -> NodeResult<HashMap<u64, ResourceList>> {
        let mut out = HashMap::with_capacity(group_ids.len());
        for group_id in group_ids {
            let per_pod: ResourceList = call(
                &self.bus,
                modules::NODE_MANAGER,
                modules::APP_MANAGER,
                Operation::Get,
                RES_INNER_GROUP_POD_RESOURCES,
                &GroupIdReq {
                    group_id: *group_id,
                },
            )
            .await?;
            out.insert(*group_id, per_pod);
        }
        Ok(out)
    }
}

fn group_view(db: &Db<'_>, group: NodeGroup) -> NodeResult<GroupView> {
    Ok(GroupView {
        node_count: db.count_group_members(group.id)?,
        group,
    })
}

fn hosts_apps(counts: &GroupAppCounts, group_id: u64) -> bool {
    counts
        .get(&group_id)
        .is_some_and(|c| c.daemon_sets > 0 || c.instances > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use edgefleet_bus::{HandlerTable, Mailbox, run_module};
    use edgefleet_cluster::{ClusterNode, MemoryCluster};
    use edgefleet_core::Quantity;
    use edgefleet_core::config::ClusterConfig;
    use edgefleet_core::inner::GroupAppCount;
    use edgefleet_core::quantity::{CPU, MEMORY};
    use tokio::sync::watch;

    use crate::status::NodeStatus;

    /// Stands in for the app manager on the bus.
    #[derive(Default)]
    struct FakeApps {
        counts: Mutex<GroupAppCounts>,
        per_pod: Mutex<HashMap<u64, ResourceList>>,
    }

    struct Harness {
        cluster: Arc<MemoryCluster>,
        store: StateStore,
        apps: Arc<FakeApps>,
        manager: NodeManager,
        edge: Mailbox,
        _shutdown: watch::Sender<bool>,
    }

    async fn harness(config: FleetConfig, workers: &[&str]) -> Harness {
        let cluster = Arc::new(MemoryCluster::new());
        for name in workers {
            cluster.add_node(worker(name));
        }
        let facade = ClusterFacade::new(cluster.clone(), &ClusterConfig::default())
            .with_retry(1, Duration::from_millis(1));
        let store = StateStore::open_in_memory().unwrap();
        let bus = ModuleBus::new(Duration::from_millis(500));
        let (shutdown, rx) = watch::channel(false);

        let apps = Arc::new(FakeApps::default());
        let table = HandlerTable::new(apps.clone())
            .route_json(
                Operation::Get,
                RES_INNER_GROUP_POD_RESOURCES,
                |f: Arc<FakeApps>, req: GroupIdReq| async move {
                    let per_pod = f.per_pod.lock().unwrap().get(&req.group_id).cloned();
                    Ok::<_, NodeError>(per_pod.unwrap_or_default())
                },
            )
            .route_json(
                Operation::Get,
                RES_INNER_INSTANCE_COUNT_BY_GROUPS,
                |f: Arc<FakeApps>, req: GroupIdsReq| async move {
                    let counts = f.counts.lock().unwrap();
                    let out: GroupAppCounts = req
                        .group_ids
                        .iter()
                        .map(|g| (*g, counts.get(g).copied().unwrap_or_default()))
                        .collect();
                    Ok::<_, NodeError>(out)
                },
            );
        let mailbox = bus.register(modules::APP_MANAGER).unwrap();
        tokio::spawn(run_module(bus.clone(), mailbox, Arc::new(table), rx.clone()));
        let edge = bus.register(modules::EDGE_CONNECTOR).unwrap();

        let informer = NodeInformer::new(facade.clone(), store.clone(), bus.clone(), &config);
        informer.start(rx).await.unwrap();
        let manager = NodeManager::new(store.clone(), facade, bus, informer, &config).unwrap();
        Harness {
            cluster,
            store,
            apps,
            manager,
            edge,
            _shutdown: shutdown,
        }
    }

    fn worker(name: &str) -> ClusterNode {
        ClusterNode::new(name).with_ready("True").with_allocatable(
            ResourceList::new()
                .with(CPU, Quantity::from_units(4))
                .with(MEMORY, Quantity::from_megabytes(4096)),
        )
    }

    fn cpu(units: i64) -> ResourceList {
        ResourceList::new().with(CPU, Quantity::from_units(units))
    }

    fn node_id(h: &Harness, unique_name: &str) -> u64 {
        h.store
            .run(|db| db.find_node_by_unique_name(unique_name))
            .unwrap()
            .unwrap()
            .id
    }

    /// Promote each worker by its unique name, joining `group_ids`.
    async fn promote(h: &Harness, names: &[&str], group_ids: &[u64]) -> Vec<u64> {
        let mut ids = Vec::new();
        for name in names {
            let id = node_id(h, name);
            h.manager
                .promote_node(PromoteNodeReq {
                    node_id: id,
                    name: name.to_string(),
                    group_ids: group_ids.to_vec(),
                    description: String::new(),
                })
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }

    fn group(h: &Harness, name: &str) -> u64 {
        h.manager
            .create_group(CreateGroupReq {
                group_name: name.to_string(),
                description: String::new(),
            })
            .unwrap()
    }

    fn has_group_label(h: &Harness, node: &str, group_id: u64) -> bool {
        let key = LabelsConfig::default().group_label(group_id);
        h.cluster.node(node).unwrap().labels.contains_key(&key)
    }

    #[tokio::test]
    async fn create_node_rejects_duplicates_and_enforces_cap() {
        let mut config = FleetConfig::default();
        config.limits.max_nodes = 2;
        let h = harness(config, &[]).await;
        let req = |name: &str, unique: &str| CreateNodeReq {
            node_name: name.to_string(),
            unique_name: unique.to_string(),
            description: String::new(),
        };

        h.manager.create_node(req("edge-a", "ua")).unwrap();
        let err = h.manager.create_node(req("edge-a", "ub")).unwrap_err();
        assert!(matches!(err, NodeError::Duplicate(_)));

        h.manager.create_node(req("edge-b", "ub")).unwrap();
        let err = h.manager.create_node(req("edge-c", "uc")).unwrap_err();
        assert!(matches!(err, NodeError::CountExceeded { what: "node", .. }));

        let err = h.manager.create_node(req("1bad", "ud")).unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
    }

    #[tokio::test]
    async fn promote_labels_node_and_repeats_cleanly() {
        let h = harness(FleetConfig::default(), &["edge-01"]).await;
        let g = group(&h, "g1");
        let id = node_id(&h, "edge-01");
        let req = PromoteNodeReq {
            node_id: id,
            name: "edge-01".to_string(),
            group_ids: vec![g],
            description: String::new(),
        };

        h.manager.promote_node(req.clone()).await.unwrap();
        assert!(h.store.run(|db| db.get_node(id)).unwrap().is_managed);
        assert!(has_group_label(&h, "edge-01", g));

        h.manager.promote_node(req.clone()).await.unwrap();

        let err = h
            .manager
            .promote_node(PromoteNodeReq {
                name: "renamed".to_string(),
                ..req
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Invalid(_)));
    }

    #[tokio::test]
    async fn add_relation_enforces_group_size() {
        let mut config = FleetConfig::default();
        config.limits.max_nodes_per_group = 1;
        let h = harness(config, &["edge-01", "edge-02"]).await;
        let g = group(&h, "g1");
        let ids = promote(&h, &["edge-01", "edge-02"], &[]).await;

        h.manager
            .add_relation(AddRelationReq {
                group_id: g,
                node_ids: vec![ids[0]],
            })
            .await
            .unwrap();
        assert!(has_group_label(&h, "edge-01", g));

        let err = h
            .manager
            .add_relation(AddRelationReq {
                group_id: g,
                node_ids: vec![ids[1]],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::CountExceeded { .. }));
        assert_eq!(h.store.run(|db| db.count_group_members(g)).unwrap(), 1);
        assert!(!has_group_label(&h, "edge-02", g));
    }

    #[tokio::test]
    async fn add_relation_refuses_unmanaged_node() {
        let h = harness(FleetConfig::default(), &["edge-01"]).await;
        let g = group(&h, "g1");
        let err = h
            .manager
            .add_relation(AddRelationReq {
                group_id: g,
                node_ids: vec![node_id(&h, "edge-01")],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Invalid(_)));
        assert_eq!(h.store.run(|db| db.count_group_members(g)).unwrap(), 0);
    }

    #[tokio::test]
    async fn joining_rescales_group_accumulator() {
        let h = harness(FleetConfig::default(), &["edge-01", "edge-02"]).await;
        let g = group(&h, "g1");
        h.apps.per_pod.lock().unwrap().insert(g, cpu(1));
        promote(&h, &["edge-01", "edge-02"], &[g]).await;

        let acc = h.store.run(|db| db.get_group(g)).unwrap().resources_request;
        assert_eq!(acc.amount(CPU), Quantity::from_units(2));
    }

    #[tokio::test]
    async fn delete_relation_refused_while_group_hosts_apps() {
        let h = harness(FleetConfig::default(), &["edge-01"]).await;
        let g = group(&h, "g1");
        let ids = promote(&h, &["edge-01"], &[g]).await;
        let req = DeleteRelationReq {
            relations: vec![RelationPair {
                group_id: g,
                node_id: ids[0],
            }],
        };

        h.apps.counts.lock().unwrap().insert(
            g,
            GroupAppCount {
                daemon_sets: 0,
                instances: 1,
            },
        );
        let err = h.manager.delete_relation(req.clone()).await.unwrap_err();
        assert!(matches!(err, NodeError::CheckFailed(_)));

        h.apps.counts.lock().unwrap().clear();
        let batch = h.manager.delete_relation(req.clone()).await.unwrap();
        assert_eq!(batch.success.len(), 1);
        assert!(!has_group_label(&h, "edge-01", g));

        let batch = h.manager.delete_relation(req).await.unwrap();
        assert_eq!(batch.failed.len(), 1);
    }

    #[tokio::test]
    async fn check_group_resources_names_node_and_dimension() {
        let h = harness(FleetConfig::default(), &["edge-01"]).await;
        let g = group(&h, "g1");
        promote(&h, &["edge-01"], &[g]).await;

        h.manager
            .check_group_resources(CheckGroupResourcesReq {
                group_id: g,
                resources: cpu(2),
            })
            .await
            .unwrap();

        let err = h
            .manager
            .check_group_resources(CheckGroupResourcesReq {
                group_id: g,
                resources: cpu(8),
            })
            .await
            .unwrap_err();
        let NodeError::CheckFailed(msg) = err else {
            panic!("expected CheckFailed, got {err:?}");
        };
        assert!(msg.contains("edge-01"));
        assert!(msg.contains("cpu"));
    }

    #[tokio::test]
    async fn update_group_resources_scales_and_rolls_back_overcommit() {
        let h = harness(FleetConfig::default(), &["edge-01", "edge-02"]).await;
        let g = group(&h, "g1");
        promote(&h, &["edge-01", "edge-02"], &[g]).await;
        let acc = |h: &Harness| h.store.run(|db| db.get_group(g)).unwrap().resources_request;

        let update = |resources, is_undeploy| UpdateGroupResourcesReq {
            group_id: g,
            resources,
            is_undeploy,
        };
        h.manager.update_group_resources(update(cpu(1), false)).unwrap();
        assert_eq!(acc(&h).amount(CPU), Quantity::from_units(2));

        let err = h
            .manager
            .update_group_resources(update(cpu(4), false))
            .unwrap_err();
        assert!(matches!(err, NodeError::CheckFailed(_)));
        assert_eq!(acc(&h).amount(CPU), Quantity::from_units(2));

        h.manager.update_group_resources(update(cpu(1), true)).unwrap();
        assert_eq!(acc(&h).amount(CPU), Quantity::ZERO);

        h.manager
            .update_group_resources(UpdateGroupResourcesReq {
                group_id: 999,
                resources: cpu(1),
                is_undeploy: true,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn batch_delete_nodes_reports_each_outcome() {
        let h = harness(FleetConfig::default(), &["edge-01", "edge-02", "edge-03"]).await;
        let busy = group(&h, "busy");
        let ids = promote(&h, &["edge-01", "edge-02"], &[]).await;
        h.manager
            .add_relation(AddRelationReq {
                group_id: busy,
                node_ids: vec![ids[1]],
            })
            .await
            .unwrap();
        h.apps.counts.lock().unwrap().insert(
            busy,
            GroupAppCount {
                daemon_sets: 1,
                instances: 0,
            },
        );
        let unmanaged = node_id(&h, "edge-03");

        let batch = h
            .manager
            .batch_delete_nodes(NodeIdsReq {
                node_ids: vec![ids[0], ids[1], unmanaged],
            })
            .await
            .unwrap();
        assert_eq!(batch.success_ids, vec![ids[0]]);
        assert!(batch.failed_infos.contains_key(&ids[1]));
        assert!(batch.failed_infos.contains_key(&unmanaged));
        assert!(h.cluster.node("edge-01").is_none());
        assert!(h.cluster.node("edge-02").is_some());
    }

    #[tokio::test]
    async fn unmanaged_nodes_are_deleted_and_told() {
        let mut h = harness(FleetConfig::default(), &["edge-01"]).await;
        h.cluster.add_node(worker("edge-02").with_label("serialNumber", "SN-2"));
        h.manager.informer().auto_add().await.unwrap();
        for _ in 0..100 {
            if h.manager.informer().node("edge-02").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let managed = promote(&h, &["edge-01"], &[]).await[0];
        let unmanaged = node_id(&h, "edge-02");

        let batch = h
            .manager
            .batch_delete_unmanaged_nodes(NodeIdsReq {
                node_ids: vec![managed, unmanaged],
            })
            .await
            .unwrap();
        assert_eq!(batch.success_ids, vec![unmanaged]);
        assert!(batch.failed_infos.contains_key(&managed));
        assert!(h.cluster.node("edge-02").is_none());
        assert!(h.cluster.node("edge-01").is_some());

        let notice = h.edge.recv().await.unwrap();
        assert_eq!(notice.header.node_id, "SN-2");
        assert_eq!(notice.router.resource, RES_EDGE_NODE_DELETE);
        assert_eq!(notice.decode::<String>().unwrap(), "delete:SN-2");
    }

    #[tokio::test]
    async fn batch_delete_groups_skips_groups_with_apps() {
        let h = harness(FleetConfig::default(), &["edge-01"]).await;
        let free = group(&h, "free");
        let busy = group(&h, "busy");
        promote(&h, &["edge-01"], &[free]).await;
        h.apps.counts.lock().unwrap().insert(
            busy,
            GroupAppCount {
                daemon_sets: 1,
                instances: 0,
            },
        );

        let batch = h
            .manager
            .batch_delete_groups(GroupIdsReq {
                group_ids: vec![free, busy],
            })
            .await
            .unwrap();
        assert_eq!(batch.success_ids, vec![free]);
        assert!(batch.failed_infos.contains_key(&busy));
        assert!(!has_group_label(&h, "edge-01", free));
        let edge_01 = node_id(&h, "edge-01");
        assert_eq!(h.store.run(|db| db.count_node_groups(edge_01)).unwrap(), 0);
    }

    #[tokio::test]
    async fn views_join_status_and_groups() {
        let h = harness(FleetConfig::default(), &["edge-01"]).await;
        let g = group(&h, "g1");
        promote(&h, &["edge-01"], &[g]).await;

        let page = h.manager.list_nodes(ListRequest::new(1, 10, "")).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].node_group, "g1");
        assert_eq!(page.items[0].node_status, NodeStatus::Ready);
        assert_eq!(page.items[0].allocatable.cpu, Quantity::from_units(4));

        let detail = h.manager.group_detail(GroupIdReq { group_id: g }).unwrap();
        assert_eq!(detail.view.node_count, 1);
        assert_eq!(detail.nodes.len(), 1);

        let stats = h.manager.node_statistics().unwrap();
        assert_eq!(stats.ready, 1);
        assert_eq!(
            h.manager
                .node_status(UniqueNameReq {
                    unique_name: "nowhere".into()
                })
                .node_status,
            "unknown"
        );
    }
}
