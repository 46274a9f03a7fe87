//! Container definitions as operators write them, their validation, and
//! the workload spec derived from an application and a node group.

use std::collections::{BTreeMap, HashSet};

use edgefleet_cluster::{
    self as cluster, ContainerSpec, PULL_IF_NOT_PRESENT, PodTemplate, ResourceRequirements,
    SecurityContext, Volume, VolumeMount, VolumeSource, WorkloadSpec,
};
use edgefleet_core::config::LabelsConfig;
use edgefleet_core::quantity::{CPU, MEMORY};
use edgefleet_core::validate::{
    ARGS_MAX_COUNT, COMMAND_MAX_COUNT, CONTAINER_MAX_COUNT, CONTAINER_PORT_RANGE, ENV_MAX_COUNT,
    HOST_PORT_RANGE, ID_RANGE, PORT_MAP_MAX_COUNT, check_count, check_host_ip, check_range,
};
use edgefleet_core::{Field, Quantity, ResourceList, ValidationError, Validator};
use serde::{Deserialize, Serialize};

const MIN_CPU: f64 = 0.01;
const MIN_MEMORY_MB: u64 = 4;
const PROTOCOLS: [&str; 2] = ["TCP", "UDP"];
const MAX_UNAVAILABLE: &str = "100%";
const DROP_ALL: &str = "ALL";
const VOLUME_MAX_COUNT: usize = 16;
const PATH_MAX_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub name: String,
    pub proto: String,
    pub container_port: u32,
    #[serde(default)]
    pub host_ip: Option<String>,
    #[serde(default)]
    pub host_port: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPathVolume {
    pub name: String,
    pub host_path: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigmapVolume {
    pub name: String,
    pub configmap_name: String,
    pub mount_path: String,
}

/// One container of an application or template. Memory is in megabytes,
/// cpu and npu in (fractional) units. Unset limits default to the requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub image_version: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    pub cpu_request: f64,
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    pub memory_request: u64,
    #[serde(default)]
    pub memory_limit: Option<u64>,
    #[serde(default)]
    pub npu: Option<f64>,
    #[serde(default)]
    pub user_id: Option<u32>,
    #[serde(default)]
    pub group_id: Option<u32>,
    #[serde(default)]
    pub host_path_volumes: Vec<HostPathVolume>,
    #[serde(default)]
    pub configmap_volumes: Vec<ConfigmapVolume>,
}

impl Container {
    pub fn requests(&self, labels: &LabelsConfig) -> ResourceList {
        let mut list = ResourceList::new()
            .with(CPU, Quantity::from_f64(self.cpu_request))
            .with(MEMORY, Quantity::from_megabytes(self.memory_request));
        if let Some(npu) = self.npu.filter(|n| *n > 0.0) {
            list.set(&labels.npu_resource, Quantity::from_f64(npu));
        }
        list
    }

    pub fn limits(&self, labels: &LabelsConfig) -> ResourceList {
        let mut list = self.requests(labels);
        if let Some(cpu) = self.cpu_limit {
            list.set(CPU, Quantity::from_f64(cpu));
        }
        if let Some(mb) = self.memory_limit {
            list.set(MEMORY, Quantity::from_megabytes(mb));
        }
        list
    }

    /// Configmaps this container mounts.
    pub fn configmap_names(&self) -> impl Iterator<Item = &str> {
        self.configmap_volumes.iter().map(|v| v.configmap_name.as_str())
    }
}

/// Parse a stored container list.
pub fn decode_containers(json: &str) -> serde_json::Result<Vec<Container>> {
    serde_json::from_str(json)
}

/// Per-pod limits of an application: the sum over its containers.
pub fn pod_limits(containers: &[Container], labels: &LabelsConfig) -> ResourceList {
    let mut total = ResourceList::new();
    for c in containers {
        total.add(&c.limits(labels));
    }
    total
}

// ── Validation ─────────────────────────────────────────────────────

pub fn check_containers(v: &Validator, containers: &[Container]) -> Result<(), ValidationError> {
    if containers.is_empty() {
        return Err(ValidationError::new("containers", "at least one container is required"));
    }
    check_count("containers", containers.len(), CONTAINER_MAX_COUNT)?;
    let mut names = HashSet::new();
    let mut volumes: BTreeMap<&str, VolumeSource> = BTreeMap::new();
    for c in containers {
        check_container(v, c)?;
        if !names.insert(c.name.as_str()) {
            return Err(ValidationError::new(
                Field::ContainerName.name(),
                format!("duplicate container name {}", c.name),
            ));
        }
        for (name, source) in volume_sources(c) {
            match volumes.get(name) {
                Some(existing) if *existing != source => {
                    return Err(ValidationError::new(
                        "volumeName",
                        format!("volume {name} is declared with different sources"),
                    ));
                }
                Some(_) => {}
                None => {
                    volumes.insert(name, source);
                }
            }
        }
    }
    Ok(())
}

fn check_container(v: &Validator, c: &Container) -> Result<(), ValidationError> {
    v.check(Field::ContainerName, &c.name)?;
    v.check(Field::Image, &c.image)?;
    v.check(Field::ImageVersion, &c.image_version)?;

    check_count("command", c.command.len(), COMMAND_MAX_COUNT)?;
    for arg in &c.command {
        v.check(Field::ContainerCommand, arg)?;
    }
    check_count("args", c.args.len(), ARGS_MAX_COUNT)?;
    for arg in &c.args {
        v.check(Field::ContainerCommand, arg)?;
    }

    check_count("env", c.env.len(), ENV_MAX_COUNT)?;
    let mut env_names = HashSet::new();
    for env in &c.env {
        v.check(Field::ContainerEnvName, &env.name)?;
        v.check(Field::ContainerEnvValue, &env.value)?;
        if !env_names.insert(env.name.as_str()) {
            return Err(ValidationError::new(
                Field::ContainerEnvName.name(),
                format!("duplicate env name {}", env.name),
            ));
        }
    }

    check_count("ports", c.ports.len(), PORT_MAP_MAX_COUNT)?;
    for port in &c.ports {
        v.check(Field::ContainerPortName, &port.name)?;
        if !PROTOCOLS.contains(&port.proto.as_str()) {
            return Err(ValidationError::new(
                "proto",
                format!("{:?} is not one of TCP, UDP", port.proto),
            ));
        }
        check_range("containerPort", port.container_port, CONTAINER_PORT_RANGE)?;
        if let Some(host_port) = port.host_port {
            check_range("hostPort", host_port, HOST_PORT_RANGE)?;
        }
        if let Some(host_ip) = &port.host_ip {
            check_host_ip(host_ip)?;
        }
    }

    if let Some(uid) = c.user_id {
        check_range("userId", uid, ID_RANGE)?;
    }
    if let Some(gid) = c.group_id {
        check_range("groupId", gid, ID_RANGE)?;
    }

    check_resources(c)?;
    check_volumes(v, c)
}

fn check_resources(c: &Container) -> Result<(), ValidationError> {
    if !c.cpu_request.is_finite() || c.cpu_request < MIN_CPU {
        return Err(ValidationError::new(
            "cpuRequest",
            format!("must be at least {MIN_CPU}"),
        ));
    }
    if let Some(limit) = c.cpu_limit {
        if !limit.is_finite() || limit < c.cpu_request {
            return Err(ValidationError::new(
                "cpuLimit",
                "must not be lower than cpuRequest",
            ));
        }
    }
    if c.memory_request < MIN_MEMORY_MB {
        return Err(ValidationError::new(
            "memoryRequest",
            format!("must be at least {MIN_MEMORY_MB} MB"),
        ));
    }
    if c.memory_limit.is_some_and(|limit| limit < c.memory_request) {
        return Err(ValidationError::new(
            "memoryLimit",
            "must not be lower than memoryRequest",
        ));
    }
    if c.npu.is_some_and(|n| !n.is_finite() || n < 0.0) {
        return Err(ValidationError::new("npu", "must be a non-negative number"));
    }
    Ok(())
}

fn check_volumes(v: &Validator, c: &Container) -> Result<(), ValidationError> {
    check_count(
        "volumes",
        c.host_path_volumes.len() + c.configmap_volumes.len(),
        VOLUME_MAX_COUNT,
    )?;
    let mut names = HashSet::new();
    let mut mounts = HashSet::new();
    let declared = c
        .host_path_volumes
        .iter()
        .map(|h| (&h.name, &h.mount_path))
        .chain(c.configmap_volumes.iter().map(|m| (&m.name, &m.mount_path)));
    for (name, mount_path) in declared {
        v.check(Field::ContainerName, name)
            .map_err(|_| ValidationError::new("volumeName", format!("{name:?} is not a valid name")))?;
        check_path("mountPath", mount_path)?;
        if !names.insert(name.as_str()) {
            return Err(ValidationError::new("volumeName", format!("duplicate volume {name}")));
        }
        if !mounts.insert(mount_path.as_str()) {
            return Err(ValidationError::new(
                "mountPath",
                format!("{mount_path} is mounted twice"),
            ));
        }
    }
    for h in &c.host_path_volumes {
        check_path("hostPath", &h.host_path)?;
    }
    for m in &c.configmap_volumes {
        v.check(Field::ConfigmapName, &m.configmap_name)?;
    }
    Ok(())
}

fn check_path(field: &str, path: &str) -> Result<(), ValidationError> {
    if !path.starts_with('/') || path.len() > PATH_MAX_LEN || path.split('/').any(|p| p == "..") {
        return Err(ValidationError::new(
            field,
            format!("{path:?} is not an absolute path"),
        ));
    }
    Ok(())
}

fn volume_sources(c: &Container) -> impl Iterator<Item = (&str, VolumeSource)> {
    let host = c.host_path_volumes.iter().map(|h| {
        (
            h.name.as_str(),
            VolumeSource::HostPath {
                path: h.host_path.clone(),
            },
        )
    });
    let maps = c.configmap_volumes.iter().map(|m| {
        (
            m.name.as_str(),
            VolumeSource::ConfigMap {
                name: m.configmap_name.clone(),
            },
        )
    });
    host.chain(maps)
}

// ── Workload derivation ────────────────────────────────────────────

pub fn daemon_set_name(app_name: &str, group_id: u64) -> String {
    format!("{app_name}-{group_id}")
}

/// Everything needed to turn an application into workload specs.
#[derive(Debug, Clone)]
pub struct WorkloadBuilder {
    pub labels: LabelsConfig,
    pub namespace: String,
    pub image_pull_secret: String,
}

impl WorkloadBuilder {
    pub fn build(
        &self,
        app_name: &str,
        app_id: u64,
        containers: &[Container],
        group_id: u64,
    ) -> WorkloadSpec {
        let app_labels = self.labels.app_labels(app_name, app_id);
        let mut volumes: Vec<Volume> = Vec::new();
        for (name, source) in containers.iter().flat_map(volume_sources) {
            if !volumes.iter().any(|v| v.name == name) {
                volumes.push(Volume {
                    name: name.to_string(),
                    source,
                });
            }
        }
        WorkloadSpec {
            name: daemon_set_name(app_name, group_id),
            namespace: self.namespace.clone(),
            labels: app_labels.clone(),
            selector: app_labels.clone(),
            template: PodTemplate {
                labels: app_labels,
                node_selector: BTreeMap::from([(self.labels.group_label(group_id), String::new())]),
                containers: containers.iter().map(|c| self.container_spec(c)).collect(),
                volumes,
                image_pull_secrets: vec![self.image_pull_secret.clone()],
                automount_service_account_token: false,
            },
            max_unavailable: MAX_UNAVAILABLE.to_string(),
        }
    }

    fn container_spec(&self, c: &Container) -> ContainerSpec {
        let volume_mounts = c
            .host_path_volumes
            .iter()
            .map(|h| (&h.name, &h.mount_path))
            .chain(c.configmap_volumes.iter().map(|m| (&m.name, &m.mount_path)))
            .map(|(name, mount_path)| VolumeMount {
                name: name.clone(),
                mount_path: mount_path.clone(),
                read_only: true,
            })
            .collect();
        ContainerSpec {
            name: c.name.clone(),
            image: format!("{}:{}", c.image, c.image_version),
            image_pull_policy: PULL_IF_NOT_PRESENT.to_string(),
            command: c.command.clone(),
            args: c.args.clone(),
            env: c
                .env
                .iter()
                .map(|e| cluster::EnvVar {
                    name: e.name.clone(),
                    value: e.value.clone(),
                })
                .collect(),
            ports: c
                .ports
                .iter()
                .map(|p| cluster::ContainerPort {
                    name: p.name.clone(),
                    container_port: p.container_port,
                    host_port: p.host_port,
                    host_ip: p.host_ip.clone(),
                    protocol: p.proto.clone(),
                })
                .collect(),
            resources: ResourceRequirements {
                requests: c.requests(&self.labels),
                limits: c.limits(&self.labels),
            },
            volume_mounts,
            security_context: SecurityContext {
                run_as_user: c.user_id,
                run_as_group: c.group_id,
                run_as_non_root: true,
                read_only_root_filesystem: true,
                allow_privilege_escalation: false,
                drop_capabilities: vec![DROP_ALL.to_string()],
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn container(name: &str, cpu: f64, memory_mb: u64) -> Container {
        Container {
            name: name.to_string(),
            image: "face-check".to_string(),
            image_version: "1.0.2".to_string(),
            command: Vec::new(),
            args: Vec::new(),
            env: Vec::new(),
            ports: Vec::new(),
            cpu_request: cpu,
            cpu_limit: None,
            memory_request: memory_mb,
            memory_limit: None,
            npu: None,
            user_id: Some(1000),
            group_id: Some(1000),
            host_path_volumes: Vec::new(),
            configmap_volumes: Vec::new(),
        }
    }

    fn validator() -> Validator {
        Validator::new().unwrap()
    }

    fn builder() -> WorkloadBuilder {
        WorkloadBuilder {
            labels: LabelsConfig::default(),
            namespace: "user".to_string(),
            image_pull_secret: "image-pull-secret".to_string(),
        }
    }

    #[test]
    fn minimal_container_passes() {
        assert!(check_containers(&validator(), &[container("main", 0.5, 128)]).is_ok());
    }

    #[test]
    fn empty_and_duplicate_containers_rejected() {
        let v = validator();
        assert!(check_containers(&v, &[]).is_err());
        let err = check_containers(&v, &[container("main", 1.0, 64), container("main", 1.0, 64)])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate container name"));
    }

    #[test]
    fn limits_must_not_undercut_requests() {
        let v = validator();
        let mut c = container("main", 1.0, 256);
        c.cpu_limit = Some(0.5);
        assert!(check_containers(&v, &[c.clone()]).is_err());
        c.cpu_limit = Some(2.0);
        c.memory_limit = Some(128);
        assert!(check_containers(&v, &[c.clone()]).is_err());
        c.memory_limit = Some(512);
        assert!(check_containers(&v, &[c]).is_ok());
    }

    #[test]
    fn ports_are_bounded() {
        let v = validator();
        let port = |proto: &str, host_port, host_ip: Option<&str>| PortMapping {
            name: "http".to_string(),
            proto: proto.to_string(),
            container_port: 8080,
            host_ip: host_ip.map(str::to_string),
            host_port,
        };
        let with_port = |p: PortMapping| {
            let mut c = container("main", 1.0, 64);
            c.ports = vec![p];
            check_containers(&v, &[c])
        };
        assert!(with_port(port("TCP", Some(18080), Some("192.168.1.10"))).is_ok());
        assert!(with_port(port("SCTP", None, None)).is_err());
        assert!(with_port(port("UDP", Some(80), None)).is_err());
        assert!(with_port(port("TCP", Some(18080), Some("0.0.0.0"))).is_err());
    }

    #[test]
    fn env_names_unique_and_ids_in_range() {
        let v = validator();
        let mut c = container("main", 1.0, 64);
        c.env = vec![
            EnvVar {
                name: "MODE".into(),
                value: "fast".into(),
            },
            EnvVar {
                name: "MODE".into(),
                value: "slow".into(),
            },
        ];
        assert!(check_containers(&v, &[c]).is_err());

        let mut c = container("main", 1.0, 64);
        c.user_id = Some(0);
        assert!(check_containers(&v, &[c]).is_err());
    }

    #[test]
    fn shared_volume_name_needs_one_source() {
        let v = validator();
        let mut a = container("a", 1.0, 64);
        a.host_path_volumes = vec![HostPathVolume {
            name: "models".into(),
            host_path: "/var/models".into(),
            mount_path: "/models".into(),
        }];
        let mut b = container("b", 1.0, 64);
        b.configmap_volumes = vec![ConfigmapVolume {
            name: "models".into(),
            configmap_name: "cm-1".into(),
            mount_path: "/models".into(),
        }];
        assert!(check_containers(&v, &[a.clone(), b]).is_err());

        let mut c = container("c", 1.0, 64);
        c.host_path_volumes = a.host_path_volumes.clone();
        assert!(check_containers(&v, &[a, c]).is_ok());
    }

    #[test]
    fn relative_mount_path_rejected() {
        let mut c = container("main", 1.0, 64);
        c.host_path_volumes = vec![HostPathVolume {
            name: "logs".into(),
            host_path: "/var/log/app".into(),
            mount_path: "logs".into(),
        }];
        assert!(check_containers(&validator(), &[c]).is_err());
    }

    #[test]
    fn limits_default_to_requests() {
        let labels = LabelsConfig::default();
        let mut c = container("main", 0.5, 256);
        c.npu = Some(1.0);
        let limits = c.limits(&labels);
        assert_eq!(limits.amount(CPU), Quantity::from_millis(500));
        assert_eq!(limits.amount(MEMORY), Quantity::from_megabytes(256));
        assert_eq!(limits.amount(&labels.npu_resource), Quantity::from_units(1));

        c.cpu_limit = Some(2.0);
        let total = pod_limits(&[c, container("side", 0.25, 64)], &labels);
        assert_eq!(total.amount(CPU), Quantity::from_millis(2250));
        assert_eq!(total.amount(MEMORY), Quantity::from_megabytes(320));
    }

    #[test]
    fn workload_carries_labels_selector_and_hardening() {
        let b = builder();
        let mut c = container("main", 1.0, 128);
        c.configmap_volumes = vec![ConfigmapVolume {
            name: "conf".into(),
            configmap_name: "face-conf".into(),
            mount_path: "/etc/face".into(),
        }];
        let mut side = container("side", 0.5, 64);
        side.configmap_volumes = c.configmap_volumes.clone();
        let spec = b.build("face-check", 26, &[c, side], 26);

        assert_eq!(spec.name, "face-check-26");
        assert_eq!(spec.namespace, "user");
        assert_eq!(spec.max_unavailable, "100%");
        assert_eq!(spec.labels["appid"], "1a");
        assert_eq!(spec.selector, spec.template.labels);
        assert!(b.labels.is_managed(&spec.template.labels));
        assert!(spec.template.node_selector.contains_key(&b.labels.group_label(26)));
        assert_eq!(spec.template.image_pull_secrets, vec!["image-pull-secret"]);
        assert!(!spec.template.automount_service_account_token);
        assert_eq!(spec.template.volumes.len(), 1);

        let main = &spec.template.containers[0];
        assert_eq!(main.image, "face-check:1.0.2");
        assert_eq!(main.image_pull_policy, PULL_IF_NOT_PRESENT);
        assert!(main.volume_mounts.iter().all(|m| m.read_only));
        let sc = &main.security_context;
        assert!(sc.run_as_non_root && sc.read_only_root_filesystem);
        assert!(!sc.allow_privilege_escalation);
        assert_eq!(sc.drop_capabilities, vec!["ALL"]);
        assert_eq!(sc.run_as_user, Some(1000));

        assert_eq!(spec.pod_limits().amount(CPU), Quantity::from_millis(1500));
    }
}
