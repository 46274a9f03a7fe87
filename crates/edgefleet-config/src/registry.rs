//! Image registry pull credentials as a docker-config-JSON secret.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use edgefleet_cluster::Secret;
use edgefleet_core::ValidationError;
use edgefleet_core::validate::{check_host_ip, check_range};
use regex::Regex;
use serde::Deserialize;

pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";
pub const DOCKER_CONFIG_TYPE: &str = "kubernetes.io/dockerconfigjson";

const PASSWORD_MAX_LEN: usize = 256;

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfigReq {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub ip: String,
    pub port: u32,
    pub account: String,
    pub password: String,
}

impl fmt::Debug for ImageConfigReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageConfigReq")
            .field("domain", &self.domain)
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ImageConfigReq {
    /// `domain:port` when a domain is given, else `ip:port`.
    pub fn address(&self) -> String {
        let host = if self.domain.is_empty() {
            &self.ip
        } else {
            &self.domain
        };
        format!("{host}:{}", self.port)
    }

    /// `{"auths": {"<address>": {...}}}` as stored under [`DOCKER_CONFIG_KEY`].
    pub fn docker_config(&self) -> serde_json::Result<Vec<u8>> {
        let auth = STANDARD.encode(format!("{}:{}", self.account, self.password));
        let mut entry = serde_json::Map::new();
        entry.insert("auth".into(), auth.into());
        entry.insert("docker-password".into(), self.password.clone().into());
        entry.insert("docker-username".into(), self.account.clone().into());
        let mut auths = serde_json::Map::new();
        auths.insert(self.address(), entry.into());
        serde_json::to_vec(&serde_json::json!({ "auths": auths }))
    }
}

pub struct RegistryRules {
    domain: Regex,
    account: Regex,
}

impl RegistryRules {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            domain: Regex::new(
                r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
            )?,
            account: Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]{0,63}$")?,
        })
    }

    pub fn check(&self, req: &ImageConfigReq) -> Result<(), ValidationError> {
        match (req.domain.is_empty(), req.ip.is_empty()) {
            (true, true) => {
                return Err(ValidationError::new("domain", "either domain or ip is required"));
            }
            (false, _) => {
                if req.domain.len() > 253 || !self.domain.is_match(&req.domain) {
                    return Err(ValidationError::new("domain", "not a valid domain name"));
                }
            }
            (true, false) => check_host_ip(&req.ip)?,
        }
        check_range("port", req.port, 1..=65535)?;
        if !self.account.is_match(&req.account) {
            return Err(ValidationError::new("account", "does not match the required format"));
        }
        let len = req.password.chars().count();
        if len == 0 || len > PASSWORD_MAX_LEN || req.password.chars().any(char::is_control) {
            return Err(ValidationError::new(
                "password",
                format!("must be 1 to {PASSWORD_MAX_LEN} printable characters"),
            ));
        }
        Ok(())
    }
}

/// Registry address recorded in a pull secret, if it holds one.
pub fn image_address(secret: &Secret) -> Option<String> {
    let raw = secret.data.get(DOCKER_CONFIG_KEY)?;
    let doc: serde_json::Value = serde_json::from_slice(raw).ok()?;
    doc.get("auths")?.as_object()?.keys().next().cloned()
}
