//! Module names and the resources each module serves.
//!
//! User-facing resources mirror the REST paths of the management API;
//! `/inner/...` resources are only called between modules.

pub mod modules {
    pub const NODE_MANAGER: &str = "NodeManager";
    pub const APP_MANAGER: &str = "AppManager";
    pub const CONFIG_MANAGER: &str = "ConfigManager";
    pub const SOFTWARE_MANAGER: &str = "SoftwareManager";
    pub const EDGE_INSTALLER: &str = "EdgeInstaller";
    /// Link to edge agents; messages here leave the process.
    pub const EDGE_CONNECTOR: &str = "EdgeConnector";
    /// REST ingress.
    pub const RESTFUL_SERVICE: &str = "RestfulService";
    /// App-status informer, when it calls other modules.
    pub const APP_INFORMER: &str = "AppInformer";
    /// Node informer, when it calls other modules.
    pub const NODE_INFORMER: &str = "NodeInformer";
}

// ── Node manager ───────────────────────────────────────────────────

pub const RES_NODE: &str = "/edgemanager/v1/node";
pub const RES_NODE_LIST: &str = "/edgemanager/v1/node/list";
pub const RES_NODE_UNMANAGED_LIST: &str = "/edgemanager/v1/node/list/unmanaged";
pub const RES_NODE_PROMOTE: &str = "/edgemanager/v1/node/add";
pub const RES_NODE_BATCH_DELETE: &str = "/edgemanager/v1/node/batchdelete";
pub const RES_NODE_UNMANAGED_BATCH_DELETE: &str = "/edgemanager/v1/node/batchdelete/unmanaged";
pub const RES_NODE_STATISTICS: &str = "/edgemanager/v1/node/stats";
pub const RES_NODE_GROUP: &str = "/edgemanager/v1/nodegroup";
pub const RES_NODE_GROUP_LIST: &str = "/edgemanager/v1/nodegroup/list";
pub const RES_NODE_GROUP_BATCH_DELETE: &str = "/edgemanager/v1/nodegroup/batchdelete";
pub const RES_NODE_GROUP_STATISTICS: &str = "/edgemanager/v1/nodegroup/stats";
pub const RES_NODE_RELATION: &str = "/edgemanager/v1/nodegroup/node";
pub const RES_NODE_RELATION_BATCH_DELETE: &str = "/edgemanager/v1/nodegroup/node/batchdelete";

pub const RES_INNER_NODE_BY_UNIQUE_NAME: &str = "/inner/v1/node/unique-name";
pub const RES_INNER_NODE_BY_ID: &str = "/inner/v1/node/id";
pub const RES_INNER_NODE_STATUS: &str = "/inner/v1/node/status";
pub const RES_INNER_ALL_NODES: &str = "/inner/v1/node/all";
pub const RES_INNER_NODE_SOFTWARE: &str = "/inner/v1/node/software";
pub const RES_INNER_NODES_IN_GROUP: &str = "/inner/v1/nodegroup/nodes";
pub const RES_INNER_GROUPS_BY_IDS: &str = "/inner/v1/nodegroup/ids";
pub const RES_INNER_CHECK_GROUP_RESOURCES: &str = "/inner/v1/nodegroup/resources/check";
pub const RES_INNER_UPDATE_GROUP_RESOURCES: &str = "/inner/v1/nodegroup/resources/update";
/// Edge agents report their installed software versions here.
pub const RES_SOFTWARE_INFO: &str = "/edge/version-info";

// ── App manager ────────────────────────────────────────────────────

pub const RES_APP: &str = "/edgemanager/v1/app";
pub const RES_APP_LIST: &str = "/edgemanager/v1/app/list";
pub const RES_APP_BATCH_DELETE: &str = "/edgemanager/v1/app/batchdelete";
pub const RES_APP_DEPLOY: &str = "/edgemanager/v1/app/deploy";
pub const RES_APP_UNDEPLOY: &str = "/edgemanager/v1/app/undeploy";
pub const RES_APP_INSTANCE_LIST: &str = "/edgemanager/v1/app/instance/list";
pub const RES_APP_INSTANCE_BY_NODE: &str = "/edgemanager/v1/app/instance/node";
pub const RES_APP_INSTANCE_BY_APP: &str = "/edgemanager/v1/app/instance/app";
pub const RES_APP_TEMPLATE: &str = "/edgemanager/v1/apptemplate";
pub const RES_APP_TEMPLATE_LIST: &str = "/edgemanager/v1/apptemplate/list";
pub const RES_APP_TEMPLATE_BATCH_DELETE: &str = "/edgemanager/v1/apptemplate/batchdelete";
pub const RES_CONFIGMAP: &str = "/edgemanager/v1/configmap";
pub const RES_CONFIGMAP_LIST: &str = "/edgemanager/v1/configmap/list";
pub const RES_CONFIGMAP_BATCH_DELETE: &str = "/edgemanager/v1/configmap/batchdelete";

pub const RES_INNER_INSTANCE_COUNT_BY_GROUPS: &str = "/inner/v1/app/instance/count";
pub const RES_INNER_GROUP_POD_RESOURCES: &str = "/inner/v1/app/group/resources";

// ── Config manager ─────────────────────────────────────────────────

pub const RES_IMAGE_CONFIG: &str = "/edgemanager/v1/image/config";
pub const RES_TOKEN_EXPORT: &str = "/edgemanager/v1/token/export";
pub const RES_INNER_TOKEN: &str = "/inner/v1/token";
pub const RES_INNER_TOKEN_VERIFY: &str = "/inner/v1/token/verify";
pub const RES_CERT_UPDATE: &str = "/inner/v1/cert/update";
pub const RES_NODE_CHANGED: &str = "/nodemanager/node/changed";

// ── Software manager and edge installer ────────────────────────────

pub const RES_SOFTWARE_AUTH: &str = "/edgemanager/v1/software/auth";
pub const RES_SOFTWARE_URL: &str = "/edgemanager/v1/software/url";
pub const RES_INNER_DOWNLOAD_TICKET: &str = "/inner/v1/software/ticket";
pub const RES_SOFTWARE_UPGRADE: &str = "/edgemanager/v1/software/upgrade";

// ── Edge link (EdgeConnector) ──────────────────────────────────────

pub const RES_EDGE_DOWNLOAD_INFO: &str = "/edge/download";
pub const RES_EDGE_UPGRADE: &str = "/edge/upgrade";
pub const RES_EDGE_TOKEN: &str = "/edge/token";
pub const RES_CERT_DOWNLOAD: &str = "/cert/download_info";
pub const RES_EDGE_NODE_DELETE: &str = "/edge/node/delete";
