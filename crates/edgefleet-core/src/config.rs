//! edgefleet.toml configuration parser.
//!
//! Every section carries `#[serde(default)]` so a partial (or empty) file
//! yields a fully populated config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub storage: StorageConfig,
    pub bus: BusConfig,
    pub cluster: ClusterConfig,
    pub labels: LabelsConfig,
    pub limits: LimitsConfig,
    pub informer: InformerConfig,
    pub auth: AuthConfig,
    pub software: SoftwareConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/edgefleet/edgefleet.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub response_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 3000,
        }
    }
}

impl BusConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub namespace: String,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub image_pull_secret: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "edgefleet-user".to_string(),
            retry_attempts: 3,
            retry_backoff_ms: 200,
            image_pull_secret: "edgefleet-image-pull-secret".to_string(),
        }
    }
}

/// Cluster label keys shared with edge agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    pub group_prefix: String,
    pub master_label: String,
    pub npu_resource: String,
    pub app_manager_key: String,
    pub serial_number_label: String,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            group_prefix: "EdgeFleet-Node".to_string(),
            master_label: "node-role.kubernetes.io/master".to_string(),
            npu_resource: "huawei.com/Ascend310".to_string(),
            app_manager_key: "AppManager".to_string(),
            serial_number_label: "serialNumber".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_nodes: u64,
    pub max_node_groups: u64,
    pub max_nodes_per_group: u64,
    pub max_groups_per_node: u64,
    pub max_apps: u64,
    pub max_app_templates: u64,
    pub max_configmaps: u64,
    pub max_daemonsets_per_group: u64,
    pub max_pods: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_nodes: 20_000,
            max_node_groups: 100,
            max_nodes_per_group: 1024,
            max_groups_per_node: 10,
            max_apps: 1000,
            max_app_templates: 1000,
            max_configmaps: 1000,
            max_daemonsets_per_group: 16,
            max_pods: 21_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InformerConfig {
    pub node_resync_secs: u64,
    pub pod_resync_secs: u64,
    pub housekeeping_secs: u64,
    pub terminating_grace_secs: u64,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            node_resync_secs: 30,
            pod_resync_secs: 30,
            housekeeping_secs: 60,
            terminating_grace_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_expire_days: u64,
    pub token_check_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_expire_days: 7,
            token_check_interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareConfig {
    pub key_file: PathBuf,
    pub max_url_count: usize,
    pub ticket_ttl_secs: u64,
}

impl Default for SoftwareConfig {
    fn default() -> Self {
        Self {
            key_file: PathBuf::from("/var/lib/edgefleet/software.key"),
            max_url_count: 16,
            ticket_ttl_secs: 3600,
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that would make the control plane misbehave.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bus.response_timeout_ms == 0 {
            anyhow::bail!("bus.response_timeout_ms must be greater than zero");
        }
        if !(1..=365).contains(&self.auth.token_expire_days) {
            anyhow::bail!(
                "auth.token_expire_days must be within 1..=365, got {}",
                self.auth.token_expire_days
            );
        }
        if self.auth.token_check_interval_secs == 0 {
            anyhow::bail!("auth.token_check_interval_secs must be greater than zero");
        }
        let limits = [
            ("max_nodes", self.limits.max_nodes),
            ("max_node_groups", self.limits.max_node_groups),
            ("max_nodes_per_group", self.limits.max_nodes_per_group),
            ("max_groups_per_node", self.limits.max_groups_per_node),
            ("max_apps", self.limits.max_apps),
            ("max_app_templates", self.limits.max_app_templates),
            ("max_configmaps", self.limits.max_configmaps),
            ("max_daemonsets_per_group", self.limits.max_daemonsets_per_group),
            ("max_pods", self.limits.max_pods),
        ];
        for (name, value) in limits {
            if value == 0 {
                anyhow::bail!("limits.{name} must be at least 1");
            }
        }
        if self.labels.group_prefix.is_empty() {
            anyhow::bail!("labels.group_prefix must not be empty");
        }
        if self.software.max_url_count == 0 {
            anyhow::bail!("software.max_url_count must be at least 1");
        }
        Ok(())
    }
}
