//! App manager — application definitions and their deployment into node
//! groups.
//!
//! A deployment of app `a` into group `g` is one workload named
//! `<appName>-<groupId>` plus an `app_daemon_sets` row. Deploy writes the
//! row, creates the workload, then charges the group accumulator through
//! the node manager; a failure in any group unwinds every group this call
//! already deployed. Undeploy runs the same steps backwards and is
//! idempotent, so it doubles as the cleanup path after a failed rollback.

use edgefleet_bus::routes::{
    RES_INNER_CHECK_GROUP_RESOURCES, RES_INNER_UPDATE_GROUP_RESOURCES, modules,
};
use edgefleet_bus::{BusError, ModuleBus, Operation, call};
use edgefleet_cluster::ClusterFacade;
use edgefleet_core::config::{FleetConfig, LabelsConfig, LimitsConfig};
use edgefleet_core::inner::{
    CheckGroupResourcesReq, GroupAppCount, GroupAppCounts, GroupIdReq, GroupIdsReq, GroupRef,
    NodeIdReq, UpdateGroupResourcesReq,
};
use edgefleet_core::validate::check_id_batch;
use edgefleet_core::{BatchResp, ErrorCode, Field, ListRequest, Page, ResourceList, Validator};
use edgefleet_state::{AppDaemonSet, AppInfo, AppTable, Db, NewDaemonSet, StateStore};
use tracing::{debug, info, warn};

use crate::container::{
    Container, WorkloadBuilder, check_containers, daemon_set_name, decode_containers, pod_limits,
};
use crate::error::{AppError, AppResult};
use crate::informer::AppInformer;
use crate::types::*;

pub struct AppManager {
    pub(crate) store: StateStore,
    pub(crate) cluster: ClusterFacade,
    bus: ModuleBus,
    informer: AppInformer,
    pub(crate) builder: WorkloadBuilder,
    pub(crate) limits: LimitsConfig,
    pub(crate) validator: Validator,
}

impl AppManager {
    pub fn new(
        store: StateStore,
        cluster: ClusterFacade,
        bus: ModuleBus,
        informer: AppInformer,
        config: &FleetConfig,
    ) -> AppResult<Self> {
        let validator = Validator::new()
            .map_err(|e| AppError::Invalid(format!("validation rules: {e}")))?;
        let builder = WorkloadBuilder {
            labels: config.labels.clone(),
            namespace: cluster.namespace().to_string(),
            image_pull_secret: config.cluster.image_pull_secret.clone(),
        };
        Ok(Self {
            store,
            cluster,
            bus,
            informer,
            builder,
            limits: config.limits.clone(),
            validator,
        })
    }

    pub fn informer(&self) -> &AppInformer {
        &self.informer
    }

    pub(crate) fn labels(&self) -> &LabelsConfig {
        &self.builder.labels
    }

    /// Format rules shared by applications and templates.
    pub(crate) fn check_definition(
        &self,
        app_name: Option<&str>,
        description: &str,
        containers: &[Container],
    ) -> AppResult<()> {
        if let Some(name) = app_name {
            self.validator.check(Field::AppName, name)?;
        }
        self.validator.check(Field::Description, description)?;
        check_containers(&self.validator, containers)?;
        Ok(())
    }

    /// Every configmap a container mounts must be known.
    fn check_configmaps_exist(&self, containers: &[Container]) -> AppResult<()> {
        self.store.run(|db| {
            for name in containers.iter().flat_map(Container::configmap_names) {
                if db.find_configmap_by_name(name)?.is_none() {
                    return Err(AppError::NotFound(format!("configmap {name}")));
                }
            }
            Ok(())
        })
    }

    // ── Applications ───────────────────────────────────────────────

    pub fn create_app(&self, req: CreateAppReq) -> AppResult<u64> {
        self.check_definition(Some(&req.app_name), &req.description, &req.containers)?;
        self.check_configmaps_exist(&req.containers)?;
        let containers = serde_json::to_string(&req.containers)?;
        let id = self.store.transaction(|db| {
            let count = db.count_apps(AppTable::Apps)?;
            if count >= self.limits.max_apps {
                return Err(AppError::CountExceeded {
                    what: "apps",
                    count: count + 1,
                    max: self.limits.max_apps,
                });
            }
            db.insert_app(AppTable::Apps, &req.app_name, &req.description, &containers)
                .map_err(AppError::duplicate_on(&req.app_name))
        })?;
        info!(id, app = %req.app_name, "app created");
        Ok(id)
    }

    pub fn get_app(&self, req: AppIdReq) -> AppResult<AppView> {
        self.store.run(|db| app_view(db, db.get_app(AppTable::Apps, req.app_id)?))
    }

    pub fn list_apps(&self, req: ListRequest) -> AppResult<Page<AppView>> {
        let query = req.to_query()?;
        self.store.run(|db| {
            let page = db.list_apps(AppTable::Apps, &query)?;
            Ok(Page {
                total: page.total,
                items: page
                    .items
                    .into_iter()
                    .map(|app| app_view(db, app))
                    .collect::<AppResult<_>>()?,
            })
        })
    }

    /// Roll a new container list out to every group the app is deployed
    /// in, move the group accumulators to the new limits, then persist it.
    /// Limits that grow are admitted against each group first. A failure at
    /// any step puts the workloads and charges back as they were.
    pub async fn update_app(&self, req: UpdateAppReq) -> AppResult<()> {
        self.check_definition(None, &req.description, &req.containers)?;
        self.check_configmaps_exist(&req.containers)?;
        let (app, daemon_sets) = self.store.run(|db| -> AppResult<_> {
            Ok((
                db.get_app(AppTable::Apps, req.app_id)?,
                db.daemon_sets_of_app(req.app_id)?,
            ))
        })?;
        let old_containers = decode_containers(&app.containers)?;
        let old_limits = pod_limits(&old_containers, self.labels());
        let new_limits = pod_limits(&req.containers, self.labels());
        let containers = serde_json::to_string(&req.containers)?;

        let mut growth = new_limits.clone();
        growth.sub(&old_limits);
        if !growth.is_empty() {
            for ds in &daemon_sets {
                self.check_group_resources(ds.node_group_id, &growth).await?;
            }
        }

        self.roll_out(&app, &daemon_sets, &req.containers, &old_containers)
            .await?;
        let recharged = old_limits != new_limits;
        if recharged {
            if let Err(e) = self.move_charges(&daemon_sets, &old_limits, &new_limits).await {
                self.restore_workloads(&app, &daemon_sets, &old_containers).await;
                return Err(e);
            }
        }
        if let Err(e) = self
            .store
            .run(|db| db.update_app(AppTable::Apps, app.id, &req.description, &containers))
        {
            if recharged {
                if let Err(re) = self.move_charges(&daemon_sets, &new_limits, &old_limits).await {
                    warn!(app = %app.app_name, error = %re, "group charges not restored");
                }
            }
            self.restore_workloads(&app, &daemon_sets, &old_containers).await;
            return Err(e.into());
        }
        info!(id = app.id, app = %app.app_name, groups = daemon_sets.len(), "app updated");
        Ok(())
    }

    /// Update each deployed workload to `containers`. On failure the
    /// workloads already updated go back to `previous`.
    async fn roll_out(
        &self,
        app: &AppInfo,
        daemon_sets: &[AppDaemonSet],
        containers: &[Container],
        previous: &[Container],
    ) -> AppResult<()> {
        for (done, ds) in daemon_sets.iter().enumerate() {
            let spec = self
                .builder
                .build(&app.app_name, app.id, containers, ds.node_group_id);
            if let Err(e) = self.cluster.update_workload(&spec).await {
                warn!(workload = %spec.name, error = %e, "workload update failed, restoring");
                self.restore_workloads(app, &daemon_sets[..done], previous).await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn restore_workloads(
        &self,
        app: &AppInfo,
        daemon_sets: &[AppDaemonSet],
        containers: &[Container],
    ) {
        for ds in daemon_sets {
            let spec = self
                .builder
                .build(&app.app_name, app.id, containers, ds.node_group_id);
            if let Err(e) = self.cluster.update_workload(&spec).await {
                warn!(workload = %spec.name, error = %e, "workload not restored");
            }
        }
    }

    /// Re-charge each group from `from` to `to`; on failure every group
    /// already moved is put back.
    async fn move_charges(
        &self,
        daemon_sets: &[AppDaemonSet],
        from: &ResourceList,
        to: &ResourceList,
    ) -> AppResult<()> {
        let mut moved: Vec<u64> = Vec::new();
        for ds in daemon_sets {
            let group_id = ds.node_group_id;
            self.update_group_resources(group_id, from, true).await?;
            if let Err(e) = self.update_group_resources(group_id, to, false).await {
                let mut restore = vec![group_id];
                restore.extend(moved.iter().rev());
                for g in restore {
                    if g != group_id {
                        if let Err(re) = self.update_group_resources(g, to, true).await {
                            warn!(group_id = g, error = %re, "failed to release new limits");
                        }
                    }
                    if let Err(re) = self.update_group_resources(g, from, false).await {
                        warn!(group_id = g, error = %re, "failed to restore old limits");
                    }
                }
                return Err(e);
            }
            moved.push(group_id);
        }
        Ok(())
    }

    pub fn delete_apps(&self, req: AppIdsReq) -> AppResult<BatchResp> {
        check_id_batch("appIds", &req.app_ids)?;
        let mut batch = BatchResp::default();
        for id in req.app_ids {
            match self.delete_app(id) {
                Ok(()) => batch.succeed(id),
                Err(e) => {
                    warn!(id, error = %e, "app not deleted");
                    batch.fail(id, e.to_string());
                }
            }
        }
        Ok(batch)
    }

    fn delete_app(&self, id: u64) -> AppResult<()> {
        let app = self.store.transaction(|db| {
            let app = db.get_app(AppTable::Apps, id)?;
            let deployed = db.daemon_sets_of_app(id)?;
            if !deployed.is_empty() {
                return Err(AppError::CheckFailed(format!(
                    "app {} is still deployed in {} node group(s)",
                    app.app_name,
                    deployed.len()
                )));
            }
            db.delete_app(AppTable::Apps, id)?;
            Ok(app)
        })?;
        info!(id, app = %app.app_name, "app deleted");
        Ok(())
    }

    // ── Deployment ─────────────────────────────────────────────────

    pub async fn deploy_app(&self, req: DeployReq) -> AppResult<BatchResp> {
        check_id_batch("nodeGroupIds", &req.node_group_ids)?;
        let app = self.store.run(|db| db.get_app(AppTable::Apps, req.app_id))?;
        let containers = decode_containers(&app.containers)?;
        let per_pod = pod_limits(&containers, self.labels());

        let groups = self.store.run(|db| -> AppResult<Vec<(u64, String)>> {
            let mut groups = Vec::with_capacity(req.node_group_ids.len());
            for group_id in &req.node_group_ids {
                let group = db.get_group(*group_id)?;
                if db.find_daemon_set(app.id, group.id)?.is_some() {
                    return Err(AppError::Duplicate(format!(
                        "app {} in node group {}",
                        app.app_name, group.group_name
                    )));
                }
                let count = db.count_daemon_sets_of_group(group.id)? + 1;
                if count > self.limits.max_daemonsets_per_group {
                    return Err(AppError::CountExceeded {
                        what: "apps in node group",
                        count,
                        max: self.limits.max_daemonsets_per_group,
                    });
                }
                groups.push((group.id, group.group_name));
            }
            Ok(groups)
        })?;

        for (group_id, _) in &groups {
            self.check_group_resources(*group_id, &per_pod).await?;
        }

        let mut deployed: Vec<u64> = Vec::with_capacity(groups.len());
        for (group_id, group_name) in &groups {
            if let Err(e) = self
                .deploy_one(&app, &containers, &per_pod, *group_id, group_name)
                .await
            {
                warn!(app = %app.app_name, group_id, error = %e, "deploy failed, rolling back");
                let mut batch = BatchResp::default();
                batch.fail(*group_id, e.to_string());
                for done in deployed.iter().rev() {
                    if let Err(re) = self.undeploy_one(&app, &per_pod, *done).await {
                        warn!(app = %app.app_name, group_id = done, error = %re, "rollback failed");
                        batch.fail(*done, format!("rollback failed: {re}"));
                    }
                }
                return Err(AppError::DeployFailed {
                    group_id: *group_id,
                    source: Box::new(e),
                    batch,
                });
            }
            deployed.push(*group_id);
        }

        info!(app = %app.app_name, groups = ?deployed, "app deployed");
        let mut batch = BatchResp::default();
        for group_id in deployed {
            batch.succeed(group_id);
        }
        Ok(batch)
    }

    async fn deploy_one(
        &self,
        app: &AppInfo,
        containers: &[Container],
        per_pod: &ResourceList,
        group_id: u64,
        group_name: &str,
    ) -> AppResult<()> {
        let spec = self
            .builder
            .build(&app.app_name, app.id, containers, group_id);
        let _held = self.informer.hold(&spec.name);
        self.store
            .run(|db| {
                db.insert_daemon_set(&NewDaemonSet {
                    daemon_set_name: spec.name.clone(),
                    app_id: app.id,
                    node_group_id: group_id,
                    node_group_name: group_name.to_string(),
                })
            })
            .map_err(AppError::duplicate_on(&spec.name))?;

        if let Err(e) = self.cluster.create_workload(&spec).await {
            self.drop_row(&spec.name);
            return Err(e.into());
        }
        if let Err(e) = self.update_group_resources(group_id, per_pod, false).await {
            self.drop_row(&spec.name);
            if let Err(de) = self.cluster.delete_workload(&spec.name).await {
                warn!(workload = %spec.name, error = %de, "workload left behind");
            }
            return Err(e);
        }
        debug!(workload = %spec.name, group_id, "workload created");
        Ok(())
    }

    fn drop_row(&self, name: &str) {
        if let Err(e) = self.store.run(|db| db.delete_daemon_set_by_name(name)) {
            warn!(workload = %name, error = %e, "daemon set row left behind");
        }
    }

    pub async fn undeploy_app(&self, req: DeployReq) -> AppResult<BatchResp> {
        check_id_batch("nodeGroupIds", &req.node_group_ids)?;
        let app = self.store.run(|db| db.get_app(AppTable::Apps, req.app_id))?;
        let per_pod = pod_limits(&decode_containers(&app.containers)?, self.labels());
        let mut batch = BatchResp::default();
        for group_id in req.node_group_ids {
            match self.undeploy_one(&app, &per_pod, group_id).await {
                Ok(()) => batch.succeed(group_id),
                Err(e) => {
                    warn!(app = %app.app_name, group_id, error = %e, "undeploy failed");
                    batch.fail(group_id, e.to_string());
                }
            }
        }
        info!(app = %app.app_name, undeployed = batch.success_ids.len(), "app undeployed");
        Ok(batch)
    }

    /// Row, then charge, then workload. Every step tolerates having
    /// already happened.
    async fn undeploy_one(&self, app: &AppInfo, per_pod: &ResourceList, group_id: u64) -> AppResult<()> {
        let name = daemon_set_name(&app.app_name, group_id);
        let _held = self.informer.hold(&name);
        let removed = self.store.run(|db| db.delete_daemon_set_by_name(&name))?;
        let released = if removed {
            self.update_group_resources(group_id, per_pod, true).await
        } else {
            Ok(())
        };
        self.cluster.delete_workload(&name).await?;
        released
    }

    // ── Instances ──────────────────────────────────────────────────

    pub async fn list_instances(&self, req: ListRequest) -> AppResult<Page<InstanceView>> {
        let query = req.to_query()?;
        let page = self.store.run(|db| db.list_instances(&query))?;
        Ok(Page {
            total: page.total,
            items: self.informer.views(page.items).await,
        })
    }

    pub async fn instances_by_node(&self, req: NodeIdReq) -> AppResult<Vec<InstanceView>> {
        let rows = self.store.run(|db| db.instances_of_node(req.node_id))?;
        Ok(self.informer.views(rows).await)
    }

    pub async fn instances_of_app(&self, req: AppIdReq) -> AppResult<Vec<InstanceView>> {
        let rows = self.store.run(|db| -> AppResult<_> {
            db.get_app(AppTable::Apps, req.app_id)?;
            Ok(db.instances_of_app(req.app_id)?)
        })?;
        Ok(self.informer.views(rows).await)
    }

    // ── Inner operations ───────────────────────────────────────────

    pub fn instance_counts(&self, req: GroupIdsReq) -> AppResult<GroupAppCounts> {
        self.store.run(|db| {
            let mut counts = GroupAppCounts::new();
            for group_id in req.group_ids {
                counts.insert(
                    group_id,
                    GroupAppCount {
                        daemon_sets: db.count_daemon_sets_of_group(group_id)?,
                        instances: db.count_instances_of_group(group_id)?,
                    },
                );
            }
            Ok(counts)
        })
    }

    /// Per-pod limits of every app deployed into the group.
    pub fn group_pod_resources(&self, req: GroupIdReq) -> AppResult<ResourceList> {
        self.store.run(|db| {
            let mut total = ResourceList::new();
            for ds in db.daemon_sets_of_group(req.group_id)? {
                let app = db.get_app(AppTable::Apps, ds.app_id)?;
                total.add(&pod_limits(&decode_containers(&app.containers)?, self.labels()));
            }
            Ok(total)
        })
    }

    // ── Node manager calls ─────────────────────────────────────────

    async fn check_group_resources(&self, group_id: u64, resources: &ResourceList) -> AppResult<()> {
        call::<_, ()>(
            &self.bus,
            modules::APP_MANAGER,
            modules::NODE_MANAGER,
            Operation::Get,
            RES_INNER_CHECK_GROUP_RESOURCES,
            &CheckGroupResourcesReq {
                group_id,
                resources: resources.clone(),
            },
        )
        .await
        .map_err(|e| match e {
            BusError::Remote {
                code: ErrorCode::CheckFailed,
                msg,
            } => AppError::CheckFailed(msg),
            e => e.into(),
        })
    }

    async fn update_group_resources(
        &self,
        group_id: u64,
        resources: &ResourceList,
        is_undeploy: bool,
    ) -> AppResult<()> {
        call::<_, ()>(
            &self.bus,
            modules::APP_MANAGER,
            modules::NODE_MANAGER,
            Operation::Update,
            RES_INNER_UPDATE_GROUP_RESOURCES,
            &UpdateGroupResourcesReq {
                group_id,
                resources: resources.clone(),
                is_undeploy,
            },
        )
        .await?;
        Ok(())
    }
}

fn app_view(db: &Db<'_>, app: AppInfo) -> AppResult<AppView> {
    let groups = db
        .daemon_sets_of_app(app.id)?
        .into_iter()
        .map(|ds| GroupRef {
            group_id: ds.node_group_id,
            group_name: ds.node_group_name,
        })
        .collect();
    AppView::new(app, groups)
}
