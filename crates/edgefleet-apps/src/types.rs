//! Request bodies and joined views served by the app manager.

use edgefleet_core::inner::GroupRef;
use edgefleet_state::{AppInfo, AppInstance, ConfigmapInfo};
use serde::{Deserialize, Serialize};

use crate::container::{Container, decode_containers};
use crate::error::AppResult;

// ── Requests ───────────────────────────────────────────────────────

/// Create an application or a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppReq {
    pub app_name: String,
    #[serde(default)]
    pub description: String,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppReq {
    pub app_id: u64,
    #[serde(default)]
    pub description: String,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdReq {
    pub app_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdsReq {
    pub app_ids: Vec<u64>,
}

/// Deploy into, or undeploy from, a set of node groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReq {
    pub app_id: u64,
    pub node_group_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateReq {
    pub template_id: u64,
    #[serde(default)]
    pub description: String,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateIdReq {
    pub template_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateIdsReq {
    pub template_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigmapItem {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConfigmapReq {
    pub configmap_name: String,
    #[serde(default)]
    pub description: String,
    pub configmap_content: Vec<ConfigmapItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigmapReq {
    pub configmap_id: u64,
    #[serde(default)]
    pub description: String,
    pub configmap_content: Vec<ConfigmapItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigmapIdReq {
    pub configmap_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigmapIdsReq {
    pub configmap_ids: Vec<u64>,
}

// ── Views ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppView {
    pub app_id: u64,
    pub app_name: String,
    pub description: String,
    pub containers: Vec<Container>,
    /// Groups the app is deployed into; always empty for templates.
    pub node_groups: Vec<GroupRef>,
    pub created_at: String,
    pub modified_at: String,
}

impl AppView {
    pub fn new(app: AppInfo, node_groups: Vec<GroupRef>) -> AppResult<Self> {
        Ok(Self {
            app_id: app.id,
            containers: decode_containers(&app.containers)?,
            app_name: app.app_name,
            description: app.description,
            node_groups,
            created_at: app.created_at,
            modified_at: app.modified_at,
        })
    }
}

/// Container as recorded on an instance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Waiting,
    Running,
    Terminated,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerView {
    pub name: String,
    pub image: String,
    pub status: RunState,
    pub restart_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub id: u64,
    pub pod_name: String,
    pub app_id: u64,
    pub app_name: String,
    pub node_id: u64,
    pub node_name: String,
    pub node_unique_name: String,
    pub node_group_id: u64,
    /// Lowercase pod phase, or `unknown`.
    pub pod_status: String,
    pub containers: Vec<ContainerView>,
    pub created_at: String,
    pub updated_at: String,
}

impl InstanceView {
    pub(crate) fn from_row(row: AppInstance, pod_status: String, containers: Vec<ContainerView>) -> Self {
        Self {
            id: row.id,
            pod_name: row.pod_name,
            app_id: row.app_id,
            app_name: row.app_name,
            node_id: row.node_id,
            node_name: row.node_name,
            node_unique_name: row.node_unique_name,
            node_group_id: row.node_group_id,
            pod_status,
            containers,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigmapView {
    pub configmap_id: u64,
    pub configmap_name: String,
    pub description: String,
    pub configmap_content: Vec<ConfigmapItem>,
    /// Applications that mount this configmap.
    pub associated_apps: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ConfigmapView {
    pub fn new(info: ConfigmapInfo, associated_apps: Vec<String>) -> AppResult<Self> {
        Ok(Self {
            configmap_id: info.configmap_id,
            configmap_content: serde_json::from_str(&info.configmap_content)?,
            configmap_name: info.configmap_name,
            description: info.description,
            associated_apps,
            created_at: info.created_at,
            updated_at: info.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_state_is_lowercase_on_the_wire() {
        let view = ContainerView {
            name: "main".into(),
            image: "face-check:1.0".into(),
            status: RunState::Terminated,
            restart_count: 2,
        };
        let json = serde_json::to_value(view).unwrap();
        assert_eq!(json["status"], "terminated");
        assert_eq!(json["restartCount"], 2);
    }

    #[test]
    fn create_request_defaults_optional_container_fields() {
        let req: CreateAppReq = serde_json::from_value(serde_json::json!({
            "appName": "face-check",
            "containers": [{
                "name": "main",
                "image": "face-check",
                "imageVersion": "1.0",
                "cpuRequest": 2.0,
                "memoryRequest": 512
            }]
        }))
        .unwrap();
        assert_eq!(req.description, "");
        let c = &req.containers[0];
        assert!(c.ports.is_empty() && c.env.is_empty());
        assert_eq!(c.cpu_limit, None);
    }
}
