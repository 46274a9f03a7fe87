//! App templates and configmaps.
//!
//! Templates are application definitions that are never deployed; they
//! share the format rules of applications. Configmaps live both as a row
//! and as a cluster object labelled with the managed selector. Cluster
//! writes go first, so a row never names a configmap the cluster lacks.

use std::collections::{BTreeMap, HashSet};

use edgefleet_cluster::ConfigMap;
use edgefleet_core::validate::{
    CONFIGMAP_CONTENT_MAX_COUNT, CONFIGMAP_VALUE_MAX_LEN, check_count, check_id_batch,
};
use edgefleet_core::{BatchResp, Field, ListRequest, Page, ValidationError};
use edgefleet_state::{AppTable, ConfigmapInfo, Db};
use tracing::{info, warn};

use crate::container::{Container, decode_containers};
use crate::error::{AppError, AppResult};
use crate::manager::AppManager;
use crate::types::*;

impl AppManager {
    // ── Templates ──────────────────────────────────────────────────

    pub fn create_template(&self, req: CreateAppReq) -> AppResult<u64> {
        self.check_definition(Some(&req.app_name), &req.description, &req.containers)?;
        let containers = serde_json::to_string(&req.containers)?;
        let id = self.store.transaction(|db| {
            let count = db.count_apps(AppTable::Templates)?;
            if count >= self.limits.max_app_templates {
                return Err(AppError::CountExceeded {
                    what: "app templates",
                    count: count + 1,
                    max: self.limits.max_app_templates,
                });
            }
            db.insert_app(AppTable::Templates, &req.app_name, &req.description, &containers)
                .map_err(AppError::duplicate_on(&req.app_name))
        })?;
        info!(id, template = %req.app_name, "app template created");
        Ok(id)
    }

    pub fn get_template(&self, req: TemplateIdReq) -> AppResult<AppView> {
        let template = self
            .store
            .run(|db| db.get_app(AppTable::Templates, req.template_id))?;
        AppView::new(template, Vec::new())
    }

    pub fn list_templates(&self, req: ListRequest) -> AppResult<Page<AppView>> {
        let query = req.to_query()?;
        let page = self
            .store
            .run(|db| db.list_apps(AppTable::Templates, &query))?;
        Ok(Page {
            total: page.total,
            items: page
                .items
                .into_iter()
                .map(|t| AppView::new(t, Vec::new()))
                .collect::<AppResult<_>>()?,
        })
    }

    pub fn update_template(&self, req: UpdateTemplateReq) -> AppResult<()> {
        self.check_definition(None, &req.description, &req.containers)?;
        let containers = serde_json::to_string(&req.containers)?;
        self.store.transaction(|db| -> AppResult<()> {
            db.get_app(AppTable::Templates, req.template_id)?;
            db.update_app(
                AppTable::Templates,
                req.template_id,
                &req.description,
                &containers,
            )?;
            Ok(())
        })
    }

    pub fn delete_templates(&self, req: TemplateIdsReq) -> AppResult<BatchResp> {
        check_id_batch("templateIds", &req.template_ids)?;
        let mut batch = BatchResp::default();
        for id in req.template_ids {
            match self.store.run(|db| db.delete_app(AppTable::Templates, id)) {
                Ok(true) => batch.succeed(id),
                Ok(false) => batch.fail(id, format!("app template {id} not found")),
                Err(e) => batch.fail(id, e.to_string()),
            }
        }
        Ok(batch)
    }

    // ── Configmaps ─────────────────────────────────────────────────

    fn check_configmap_content(&self, description: &str, items: &[ConfigmapItem]) -> AppResult<()> {
        self.validator.check(Field::Description, description)?;
        check_count("configmapContent", items.len(), CONFIGMAP_CONTENT_MAX_COUNT)?;
        let mut keys = HashSet::new();
        for item in items {
            self.validator.check(Field::ConfigmapContentKey, &item.name)?;
            if item.value.chars().count() > CONFIGMAP_VALUE_MAX_LEN {
                return Err(ValidationError::new(
                    "configmapContentValue",
                    format!("value of {} exceeds {CONFIGMAP_VALUE_MAX_LEN} characters", item.name),
                )
                .into());
            }
            if !keys.insert(item.name.as_str()) {
                return Err(ValidationError::new(
                    Field::ConfigmapContentKey.name(),
                    format!("duplicate key {}", item.name),
                )
                .into());
            }
        }
        Ok(())
    }

    fn cluster_config_map(&self, name: &str, items: &[ConfigmapItem]) -> ConfigMap {
        ConfigMap {
            name: name.to_string(),
            namespace: self.cluster.namespace().to_string(),
            labels: self.labels().managed_selector(),
            data: items
                .iter()
                .map(|item| (item.name.clone(), item.value.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    pub async fn create_configmap(&self, req: CreateConfigmapReq) -> AppResult<u64> {
        self.validator.check(Field::ConfigmapName, &req.configmap_name)?;
        self.check_configmap_content(&req.description, &req.configmap_content)?;
        let content = serde_json::to_string(&req.configmap_content)?;
        self.store.run(|db| -> AppResult<()> {
            let count = db.count_configmaps()?;
            if count >= self.limits.max_configmaps {
                return Err(AppError::CountExceeded {
                    what: "configmaps",
                    count: count + 1,
                    max: self.limits.max_configmaps,
                });
            }
            if db.find_configmap_by_name(&req.configmap_name)?.is_some() {
                return Err(AppError::Duplicate(format!("configmap {}", req.configmap_name)));
            }
            Ok(())
        })?;

        let config_map = self.cluster_config_map(&req.configmap_name, &req.configmap_content);
        self.cluster.create_config_map(&config_map).await?;
        let stored = self.store.run(|db| {
            db.insert_configmap(&req.configmap_name, &req.description, &content)
                .map_err(AppError::duplicate_on(&req.configmap_name))
        });
        match stored {
            Ok(id) => {
                info!(id, configmap = %req.configmap_name, "configmap created");
                Ok(id)
            }
            Err(e) => {
                if let Err(ce) = self.cluster.delete_config_map(&req.configmap_name).await {
                    warn!(configmap = %req.configmap_name, error = %ce, "cluster configmap left behind");
                }
                Err(e)
            }
        }
    }

    pub async fn update_configmap(&self, req: UpdateConfigmapReq) -> AppResult<()> {
        self.check_configmap_content(&req.description, &req.configmap_content)?;
        let info = self.store.run(|db| db.get_configmap(req.configmap_id))?;
        let content = serde_json::to_string(&req.configmap_content)?;
        let config_map = self.cluster_config_map(&info.configmap_name, &req.configmap_content);
        self.cluster.update_config_map(&config_map).await?;
        self.store.run(|db| db.update_configmap(info.configmap_id, &req.description, &content))?;
        info!(id = info.configmap_id, configmap = %info.configmap_name, "configmap updated");
        Ok(())
    }

    pub fn get_configmap(&self, req: ConfigmapIdReq) -> AppResult<ConfigmapView> {
        self.store.run(|db| {
            let info = db.get_configmap(req.configmap_id)?;
            configmap_view(db, info)
        })
    }

    pub fn list_configmaps(&self, req: ListRequest) -> AppResult<Page<ConfigmapView>> {
        let query = req.to_query()?;
        self.store.run(|db| {
            let page = db.list_configmaps(&query)?;
            Ok(Page {
                total: page.total,
                items: page
                    .items
                    .into_iter()
                    .map(|info| configmap_view(db, info))
                    .collect::<AppResult<_>>()?,
            })
        })
    }

    pub async fn delete_configmaps(&self, req: ConfigmapIdsReq) -> AppResult<BatchResp> {
        check_id_batch("configmapIds", &req.configmap_ids)?;
        let mut batch = BatchResp::default();
        for id in req.configmap_ids {
            match self.delete_configmap(id).await {
                Ok(()) => batch.succeed(id),
                Err(e) => {
                    warn!(id, error = %e, "configmap not deleted");
                    batch.fail(id, e.to_string());
                }
            }
        }
        Ok(batch)
    }

    async fn delete_configmap(&self, id: u64) -> AppResult<()> {
        let info = self.store.transaction(|db| {
            let info = db.get_configmap(id)?;
            let users = apps_mounting(db, &info.configmap_name)?;
            if !users.is_empty() {
                return Err(AppError::CheckFailed(format!(
                    "configmap {} is mounted by {}",
                    info.configmap_name,
                    users.join(", ")
                )));
            }
            db.delete_configmap(id)?;
            Ok(info)
        })?;
        self.cluster.delete_config_map(&info.configmap_name).await?;
        info!(id, configmap = %info.configmap_name, "configmap deleted");
        Ok(())
    }
}

/// Names of the applications with a container mounting `configmap`.
fn apps_mounting(db: &Db<'_>, configmap: &str) -> AppResult<Vec<String>> {
    let mut names = Vec::new();
    for app in db.all_apps(AppTable::Apps)? {
        let containers = decode_containers(&app.containers)?;
        if containers
            .iter()
            .flat_map(Container::configmap_names)
            .any(|name| name == configmap)
        {
            names.push(app.app_name);
        }
    }
    Ok(names)
}

fn configmap_view(db: &Db<'_>, info: ConfigmapInfo) -> AppResult<ConfigmapView> {
    let apps = apps_mounting(db, &info.configmap_name)?;
    ConfigmapView::new(info, apps)
}
