//! Config manager — image registry secret, certificate fan-out to edge
//! nodes, and the single enrolment token.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use edgefleet_bus::routes::{RES_CERT_DOWNLOAD, RES_INNER_ALL_NODES, modules};
use edgefleet_bus::{Message, ModuleBus, Operation, call};
use edgefleet_cluster::{ClusterFacade, Secret};
use edgefleet_core::config::{AuthConfig, FleetConfig};
use edgefleet_core::inner::{
    CertDownload, CertUpdate, NodeChanged, NodeSummary, TokenResp, VerifyTokenReq,
};
use edgefleet_core::time::epoch_secs;
use edgefleet_state::{StateStore, TokenInfo};
use ring::rand::SystemRandom;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::registry::{
    DOCKER_CONFIG_KEY, DOCKER_CONFIG_TYPE, ImageConfigReq, RegistryRules, image_address,
};
use crate::token::{SECONDS_PER_DAY, generate_password, hash_password, new_salt, verify_password};

/// Name of the registry CA certificate.
pub const IMAGE_CERT: &str = "image";
pub const CERT_OPT_DELETE: &str = "delete";

pub struct ConfigManager {
    store: StateStore,
    cluster: ClusterFacade,
    bus: ModuleBus,
    auth: AuthConfig,
    pull_secret: String,
    rules: RegistryRules,
    rng: SystemRandom,
    /// Latest content of each certificate, by name.
    certs: RwLock<BTreeMap<String, String>>,
}

impl ConfigManager {
    pub fn new(
        store: StateStore,
        cluster: ClusterFacade,
        bus: ModuleBus,
        config: &FleetConfig,
    ) -> ConfigResult<Self> {
        let rules = RegistryRules::new()
            .map_err(|e| ConfigError::Crypto(format!("registry rules: {e}")))?;
        Ok(Self {
            store,
            cluster,
            bus,
            auth: config.auth.clone(),
            pull_secret: config.cluster.image_pull_secret.clone(),
            rules,
            rng: SystemRandom::new(),
            certs: RwLock::new(BTreeMap::new()),
        })
    }

    fn cert(&self, name: &str) -> Option<String> {
        self.certs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    // ── Image registry ─────────────────────────────────────────────

    /// Upsert the pull secret, then push the registry CA to every node.
    /// The push is best-effort.
    pub async fn image_config(&self, req: ImageConfigReq) -> ConfigResult<()> {
        self.rules.check(&req)?;
        let address = req.address();
        let secret = Secret {
            name: self.pull_secret.clone(),
            namespace: self.cluster.namespace().to_string(),
            kind: DOCKER_CONFIG_TYPE.to_string(),
            data: BTreeMap::from([(DOCKER_CONFIG_KEY.to_string(), req.docker_config()?)]),
        };
        self.cluster.create_or_update_secret(&secret).await?;
        info!(secret = %self.pull_secret, %address, "image registry secret stored");

        match self.image_cert_download(address) {
            Some(download) => match self.all_nodes().await {
                Ok(nodes) => {
                    self.push(&download, &nodes).await;
                }
                Err(e) => warn!(error = %e, "registry certificate not distributed"),
            },
            None => warn!(cert = IMAGE_CERT, "certificate not imported yet, nothing to distribute"),
        }
        Ok(())
    }

    fn image_cert_download(&self, address: String) -> Option<CertDownload> {
        let content = self.cert(IMAGE_CERT).filter(|c| !c.is_empty())?;
        Some(CertDownload {
            cert_name: IMAGE_CERT.to_string(),
            cert_content: content,
            cert_opt: "update".to_string(),
            image_address: Some(address),
        })
    }

    /// Registry address from the stored pull secret, if one exists.
    async fn registry_address(&self) -> ConfigResult<Option<String>> {
        match self.cluster.get_secret(&self.pull_secret).await {
            Ok(secret) => Ok(image_address(&secret)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ── Certificates ───────────────────────────────────────────────

    /// Record a certificate change and push it to every node. The image
    /// certificate is only pushed once a registry is configured.
    pub async fn update_cert(&self, req: CertUpdate) -> ConfigResult<String> {
        {
            let mut certs = self.certs.write().unwrap_or_else(|e| e.into_inner());
            if req.cert_opt == CERT_OPT_DELETE {
                certs.remove(&req.cert_name);
            } else {
                certs.insert(req.cert_name.clone(), req.cert_content.clone());
            }
        }
        let mut download = CertDownload {
            cert_name: req.cert_name.clone(),
            cert_content: req.cert_content,
            cert_opt: req.cert_opt,
            image_address: None,
        };
        if req.cert_name == IMAGE_CERT {
            match self.registry_address().await? {
                Some(address) => download.image_address = Some(address),
                None => {
                    warn!("image registry not configured, certificate kept for later");
                    return Ok(req.cert_name);
                }
            }
        }
        let nodes = self.all_nodes().await?;
        let sent = self.push(&download, &nodes).await;
        info!(cert = %req.cert_name, nodes = sent, "certificate distributed");
        Ok(req.cert_name)
    }

    /// Newly joined nodes get the registry CA.
    pub async fn node_changed(&self, req: NodeChanged) -> ConfigResult<()> {
        if req.added.is_empty() {
            return Ok(());
        }
        let Some(address) = self.registry_address().await? else {
            return Ok(());
        };
        if let Some(download) = self.image_cert_download(address) {
            let sent = self.push(&download, &req.added).await;
            debug!(nodes = sent, "registry certificate pushed to new nodes");
        }
        Ok(())
    }

    async fn all_nodes(&self) -> ConfigResult<Vec<NodeSummary>> {
        Ok(call(
            &self.bus,
            modules::CONFIG_MANAGER,
            modules::NODE_MANAGER,
            Operation::Get,
            RES_INNER_ALL_NODES,
            &serde_json::Value::Null,
        )
        .await?)
    }

    /// One message per node with a serial number; returns how many the
    /// edge link accepted.
    async fn push(&self, download: &CertDownload, nodes: &[NodeSummary]) -> usize {
        let mut sent = 0;
        for node in nodes.iter().filter(|n| !n.serial_number.is_empty()) {
            let msg = match Message::with_body(
                modules::CONFIG_MANAGER,
                modules::EDGE_CONNECTOR,
                Operation::Post,
                RES_CERT_DOWNLOAD,
                download,
            ) {
                Ok(msg) => msg.with_node_id(node.serial_number.clone()),
                Err(e) => {
                    warn!(error = %e, "certificate message not encoded");
                    return sent;
                }
            };
            match self.bus.send(msg).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(node = %node.serial_number, error = %e, "certificate not sent"),
            }
        }
        sent
    }

    // ── Token ──────────────────────────────────────────────────────

    /// Issue a fresh token, replacing any previous one. The raw password
    /// is returned here and nowhere else.
    pub fn export_token(&self) -> ConfigResult<String> {
        self.issue_token(epoch_secs() as i64)
    }

    fn issue_token(&self, now: i64) -> ConfigResult<String> {
        let password = generate_password(&self.rng)?;
        let salt = new_salt(&self.rng)?;
        let token = TokenInfo {
            token: hash_password(&password, &salt).to_vec(),
            salt: salt.to_vec(),
            expire_time: now + self.auth.token_expire_days as i64 * SECONDS_PER_DAY,
        };
        self.store.transaction(|db| db.replace_token(&token))?;
        info!(expire_time = token.expire_time, "token exported");
        Ok(password)
    }

    pub fn get_token(&self) -> ConfigResult<TokenResp> {
        let token = self.store.run(|db| db.get_token())?;
        Ok(TokenResp {
            token: hex::encode(&token.token),
            salt: hex::encode(&token.salt),
            expire_time: token.expire_time,
        })
    }

    pub fn verify_token(&self, req: VerifyTokenReq) -> ConfigResult<()> {
        self.verify_token_at(&req.token, epoch_secs() as i64)
    }

    fn verify_token_at(&self, password: &str, now: i64) -> ConfigResult<()> {
        let token = self.store.run(|db| db.get_token())?;
        if token.expire_time <= now {
            return Err(ConfigError::CheckFailed("token has expired".into()));
        }
        if !verify_password(password, &token.salt, &token.token) {
            return Err(ConfigError::CheckFailed("token does not match".into()));
        }
        Ok(())
    }

    /// Delete the token if it expired before `now`. Returns whether it did.
    pub fn revoke_expired(&self, now: i64) -> ConfigResult<bool> {
        let revoked = self.store.transaction(|db| -> ConfigResult<bool> {
            match db.get_token() {
                Ok(token) if token.expire_time <= now => {
                    db.delete_tokens()?;
                    Ok(true)
                }
                Ok(_) => Ok(false),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e.into()),
            }
        })?;
        if revoked {
            info!("token expired and was revoked");
        }
        Ok(revoked)
    }

    /// Periodic expiry check, first run immediately.
    pub fn spawn_token_check(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.auth.token_check_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.revoke_expired(epoch_secs() as i64) {
                            warn!(error = %e, "token expiry check failed");
                        }
                    }
                }
            }
            debug!("token check stopped");
        })
    }
}
