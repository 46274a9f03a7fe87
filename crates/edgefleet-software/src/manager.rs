//! Software manager — bundle URL lists and the shared download credential.

use std::fmt;

use edgefleet_core::ValidationError;
use edgefleet_core::config::{FleetConfig, SoftwareConfig};
use edgefleet_core::inner::{DownloadTicket, TicketReq};
use edgefleet_core::time::{epoch_secs, now_timestamp};
use edgefleet_state::{Db, StateStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cipher::CredentialCipher;
use crate::error::{SoftwareError, SoftwareResult};
use crate::urls::{SoftwareTypeReq, SoftwareUrl, UrlListReq, UrlOp, UrlRules};

/// SoftwareInfo key of the sealed credential. Software types cannot
/// contain `_`, so no URL list collides with it.
pub const AUTH_INFO_KEY: &str = "auth_info";

const USERNAME_MAX_LEN: usize = 64;
const PASSWORD_MAX_LEN: usize = 256;

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfoReq {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AuthInfoReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInfoReq")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AuthInfoReq {
    fn check(&self) -> Result<(), ValidationError> {
        let name_len = self.username.chars().count();
        if name_len == 0 || name_len > USERNAME_MAX_LEN || !self.username.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::new(
                "username",
                format!("must be 1 to {USERNAME_MAX_LEN} visible ASCII characters"),
            ));
        }
        let pw_len = self.password.chars().count();
        if pw_len == 0 || pw_len > PASSWORD_MAX_LEN || self.password.chars().any(char::is_control) {
            return Err(ValidationError::new(
                "password",
                format!("must be 1 to {PASSWORD_MAX_LEN} printable characters"),
            ));
        }
        Ok(())
    }
}

pub struct SoftwareManager {
    store: StateStore,
    cipher: CredentialCipher,
    rules: UrlRules,
    max_url_count: usize,
    ticket_ttl_secs: u64,
}

impl SoftwareManager {
    /// Opens (or creates) the key file named in `[software] key_file`.
    pub fn new(store: StateStore, config: &FleetConfig) -> SoftwareResult<Self> {
        let cipher = CredentialCipher::load_or_create(&config.software.key_file)?;
        Self::with_cipher(store, cipher, &config.software)
    }

    pub fn with_cipher(
        store: StateStore,
        cipher: CredentialCipher,
        config: &SoftwareConfig,
    ) -> SoftwareResult<Self> {
        let rules = UrlRules::new().map_err(|e| SoftwareError::Crypto(format!("url rules: {e}")))?;
        Ok(Self {
            store,
            cipher,
            rules,
            max_url_count: config.max_url_count.max(1),
            ticket_ttl_secs: config.ticket_ttl_secs,
        })
    }

    // ── Download credential ────────────────────────────────────────

    pub fn set_auth_info(&self, req: AuthInfoReq) -> SoftwareResult<()> {
        req.check()?;
        let sealed = self.cipher.seal(&serde_json::to_vec(&req)?)?;
        self.store.run(|db| db.put_software(AUTH_INFO_KEY, &sealed))?;
        info!(username = %req.username, "download credential updated");
        Ok(())
    }

    fn auth_info(&self) -> SoftwareResult<AuthInfoReq> {
        let record = self
            .store
            .run(|db| db.get_software(AUTH_INFO_KEY))?
            .ok_or_else(|| SoftwareError::NotFound("download credential".into()))?;
        let plain = self.cipher.open(&record.value)?;
        Ok(serde_json::from_slice(&plain)?)
    }

    // ── URL lists ──────────────────────────────────────────────────

    pub fn add_urls(&self, req: UrlListReq) -> SoftwareResult<Vec<SoftwareUrl>> {
        self.update_urls(req, UrlOp::Add)
    }

    pub fn delete_urls(&self, req: UrlListReq) -> SoftwareResult<Vec<SoftwareUrl>> {
        self.update_urls(req, UrlOp::Delete)
    }

    pub fn sync_urls(&self, req: UrlListReq) -> SoftwareResult<Vec<SoftwareUrl>> {
        self.update_urls(req, UrlOp::Sync)
    }

    /// Read-modify-write of one type's list inside a transaction. Returns
    /// the list as stored.
    fn update_urls(&self, req: UrlListReq, op: UrlOp) -> SoftwareResult<Vec<SoftwareUrl>> {
        self.rules.check(&req, self.max_url_count)?;
        let software_type = req.software_type;
        let now = now_timestamp();
        let incoming: Vec<SoftwareUrl> = req
            .urls
            .into_iter()
            .map(|mut u| {
                u.software_type = software_type.clone();
                if u.created_at.is_empty() && op != UrlOp::Delete {
                    u.created_at = now.clone();
                }
                u
            })
            .collect();

        let max = self.max_url_count;
        let list = self.store.transaction(|db| -> SoftwareResult<Vec<SoftwareUrl>> {
            let stored = load_urls(db, &software_type)?;
            let list = op.apply(stored, incoming, max);
            store_urls(db, &software_type, &list)?;
            Ok(list)
        })?;
        info!(software_type = %software_type, ?op, entries = list.len(), "software url list updated");
        Ok(list)
    }

    pub fn list_urls(&self, req: SoftwareTypeReq) -> SoftwareResult<Vec<SoftwareUrl>> {
        self.rules.check_type(&req.software_type)?;
        self.store.run(|db| load_urls(db, &req.software_type))
    }

    // ── Download tickets ───────────────────────────────────────────

    pub fn download_ticket(&self, req: TicketReq) -> SoftwareResult<DownloadTicket> {
        self.ticket_at(req, epoch_secs())
    }

    /// The newest URL of the requested type with the decrypted credential,
    /// valid until `now + ticket_ttl_secs`.
    fn ticket_at(&self, req: TicketReq, now: u64) -> SoftwareResult<DownloadTicket> {
        self.rules.check_type(&req.software_type)?;
        let latest = self
            .store
            .run(|db| load_urls(db, &req.software_type))?
            .into_iter()
            .next()
            .ok_or_else(|| SoftwareError::NotFound(format!("download url for {}", req.software_type)))?;
        let auth = self.auth_info()?;
        let mut ticket = DownloadTicket {
            software_type: latest.software_type,
            url: latest.url,
            version: latest.version,
            username: auth.username,
            password: auth.password,
            expire_at: now + self.ticket_ttl_secs,
            signature: String::new(),
        };
        ticket.signature = self.cipher.sign(&ticket_payload(&ticket));
        debug!(software_type = %ticket.software_type, version = %ticket.version, "download ticket issued");
        Ok(ticket)
    }

    /// Signature intact and not yet expired at `now`.
    pub fn verify_ticket(&self, ticket: &DownloadTicket, now: u64) -> bool {
        ticket.expire_at > now && self.cipher.verify(&ticket_payload(ticket), &ticket.signature)
    }
}

fn load_urls(db: &Db<'_>, software_type: &str) -> SoftwareResult<Vec<SoftwareUrl>> {
    match db.get_software(software_type)? {
        Some(record) => Ok(serde_json::from_str(&record.value)?),
        None => Ok(Vec::new()),
    }
}

fn store_urls(db: &Db<'_>, software_type: &str, list: &[SoftwareUrl]) -> SoftwareResult<()> {
    if list.is_empty() {
        db.delete_software(software_type)?;
    } else {
        db.put_software(software_type, &serde_json::to_string(list)?)?;
    }
    Ok(())
}

/// Newline-joined ticket fields; none of them may contain a newline.
fn ticket_payload(ticket: &DownloadTicket) -> Vec<u8> {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        ticket.software_type,
        ticket.url,
        ticket.version,
        ticket.username,
        ticket.password,
        ticket.expire_at
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgefleet_core::{Coded, ErrorCode};

    fn manager(dir: &tempfile::TempDir) -> SoftwareManager {
        let cipher = CredentialCipher::load_or_create(&dir.path().join("software.key")).unwrap();
        SoftwareManager::with_cipher(
            StateStore::open_in_memory().unwrap(),
            cipher,
            &SoftwareConfig::default(),
        )
        .unwrap()
    }

    fn urls(entries: &[(&str, &str)]) -> UrlListReq {
        UrlListReq {
            software_type: "edgecore".into(),
            urls: entries
                .iter()
                .map(|(version, created_at)| SoftwareUrl {
                    software_type: String::new(),
                    url: format!("https://repo.example.com/edgecore-{version}.tar.gz"),
                    version: version.to_string(),
                    created_at: created_at.to_string(),
                })
                .collect(),
        }
    }

    fn ticket_req() -> TicketReq {
        TicketReq {
            software_type: "edgecore".into(),
        }
    }

    #[test]
    fn credential_is_stored_sealed() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        m.set_auth_info(AuthInfoReq {
            username: "fetcher".into(),
            password: "Pa55-word".into(),
        })
        .unwrap();
        let stored = m.store.run(|db| db.get_software(AUTH_INFO_KEY)).unwrap().unwrap();
        assert!(!stored.value.contains("Pa55-word"));
        assert_eq!(m.auth_info().unwrap().password, "Pa55-word");

        let bad = AuthInfoReq {
            username: String::new(),
            password: "x".into(),
        };
        assert_eq!(m.set_auth_info(bad).unwrap_err().code(), ErrorCode::ParamInvalid);
    }

    #[test]
    fn url_lists_persist_per_type() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let list = m
            .add_urls(urls(&[("1.0.0", "2024-01-01 00:00:00"), ("1.1.0", "")]))
            .unwrap();
        assert_eq!(list[0].version, "1.1.0");
        assert!(!list[0].created_at.is_empty());
        assert!(list.iter().all(|u| u.software_type == "edgecore"));

        let after = m.delete_urls(urls(&[("1.1.0", "")])).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].version, "1.0.0");

        m.sync_urls(urls(&[("2.0.0", "2024-06-01 00:00:00")])).unwrap();
        let listed = m
            .list_urls(SoftwareTypeReq {
                software_type: "edgecore".into(),
            })
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version, "2.0.0");

        let other = m
            .list_urls(SoftwareTypeReq {
                software_type: "edge-installer".into(),
            })
            .unwrap();
        assert!(other.is_empty());

        m.delete_urls(urls(&[("2.0.0", "")])).unwrap();
        assert!(m.store.run(|db| db.get_software("edgecore")).unwrap().is_none());
    }

    #[test]
    fn ticket_carries_latest_url_and_credential() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        assert_eq!(
            m.ticket_at(ticket_req(), 1000).unwrap_err().code(),
            ErrorCode::RecordNotFound
        );

        m.add_urls(urls(&[("1.0.0", ""), ("1.3.0", ""), ("1.2.0", "")]))
            .unwrap();
        // No credential yet.
        assert!(matches!(
            m.ticket_at(ticket_req(), 1000),
            Err(SoftwareError::NotFound(_))
        ));

        m.set_auth_info(AuthInfoReq {
            username: "fetcher".into(),
            password: "Pa55-word".into(),
        })
        .unwrap();
        let ticket = m.ticket_at(ticket_req(), 1000).unwrap();
        assert_eq!(ticket.version, "1.3.0");
        assert_eq!(ticket.username, "fetcher");
        assert_eq!(ticket.password, "Pa55-word");
        assert_eq!(ticket.expire_at, 1000 + 3600);

        assert!(m.verify_ticket(&ticket, 1000));
        assert!(!m.verify_ticket(&ticket, 1000 + 3600));
        let forged = DownloadTicket {
            url: "https://evil.example.com/x".into(),
            ..ticket.clone()
        };
        assert!(!m.verify_ticket(&forged, 1000));
    }

    #[test]
    fn list_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir);
        let first: Vec<String> = (0..10).map(|i| format!("1.{i:02}")).collect();
        let second: Vec<String> = (10..20).map(|i| format!("1.{i:02}")).collect();
        for batch in [&first, &second] {
            let entries: Vec<(&str, &str)> = batch.iter().map(|v| (v.as_str(), "")).collect();
            m.add_urls(urls(&entries)).unwrap();
        }
        let listed = m
            .list_urls(SoftwareTypeReq {
                software_type: "edgecore".into(),
            })
            .unwrap();
        assert_eq!(listed.len(), 16);
        assert_eq!(listed[0].version, "1.19");
        assert_eq!(listed[15].version, "1.04");
    }
}
