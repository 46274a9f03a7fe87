//! Edge installer — turns upgrade requests and edge download/token requests
//! into messages for the edge link.
//!
//! Requests from the edge arrive from `EdgeConnector` with the node's serial
//! number in `header.node_id`; answers go back the same way, addressed by
//! that serial number.

use edgefleet_bus::routes::{
    RES_EDGE_DOWNLOAD_INFO, RES_EDGE_TOKEN, RES_EDGE_UPGRADE, RES_INNER_DOWNLOAD_TICKET,
    RES_INNER_NODE_BY_ID, RES_INNER_TOKEN, modules,
};
use edgefleet_bus::{Message, ModuleBus, Operation, call};
use edgefleet_core::inner::{DownloadTicket, NodeIdReq, NodeSummary, TicketReq, TokenResp};
use edgefleet_core::validate::check_id_batch;
use edgefleet_core::{BatchResp, ValidationError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SoftwareResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeReq {
    pub node_ids: Vec<u64>,
    pub software_type: String,
}

pub struct EdgeInstaller {
    bus: ModuleBus,
}

impl EdgeInstaller {
    pub fn new(bus: ModuleBus) -> Self {
        Self { bus }
    }

    /// One upgrade instruction per node, each carrying the same ticket.
    /// Nodes that are unknown or have not reported a serial number fail
    /// individually.
    pub async fn upgrade(&self, req: UpgradeReq) -> SoftwareResult<BatchResp> {
        check_id_batch("nodeIds", &req.node_ids)?;
        let ticket = self.ticket(&req.software_type).await?;
        let mut batch = BatchResp::default();
        for &node_id in &req.node_ids {
            let node: NodeSummary = match call(
                &self.bus,
                modules::EDGE_INSTALLER,
                modules::NODE_MANAGER,
                Operation::Get,
                RES_INNER_NODE_BY_ID,
                &NodeIdReq { node_id },
            )
            .await
            {
                Ok(node) => node,
                Err(e) => {
                    batch.fail(node_id, e.to_string());
                    continue;
                }
            };
            if node.serial_number.is_empty() {
                batch.fail(node_id, format!("node {} has not reported a serial number", node.node_name));
                continue;
            }
            match self.to_edge(RES_EDGE_UPGRADE, &node.serial_number, &ticket).await {
                Ok(()) => batch.succeed(node_id),
                Err(e) => batch.fail(node_id, e.to_string()),
            }
        }
        info!(
            software_type = %req.software_type,
            version = %ticket.version,
            sent = batch.success_ids.len(),
            failed = batch.failed_infos.len(),
            "upgrade instructions sent"
        );
        Ok(batch)
    }

    /// Edge request for the latest bundle of a type.
    pub async fn download_info(&self, serial: &str, req: TicketReq) -> SoftwareResult<DownloadTicket> {
        check_serial(serial)?;
        let ticket = self.ticket(&req.software_type).await?;
        self.to_edge(RES_EDGE_DOWNLOAD_INFO, serial, &ticket).await?;
        info!(node = %serial, software_type = %ticket.software_type, "download info sent");
        Ok(ticket)
    }

    /// Edge request for the enrolment token material.
    pub async fn edge_token(&self, serial: &str) -> SoftwareResult<TokenResp> {
        check_serial(serial)?;
        let token: TokenResp = call(
            &self.bus,
            modules::EDGE_INSTALLER,
            modules::CONFIG_MANAGER,
            Operation::Get,
            RES_INNER_TOKEN,
            &serde_json::Value::Null,
        )
        .await?;
        self.to_edge(RES_EDGE_TOKEN, serial, &token).await?;
        info!(node = %serial, "token sent");
        Ok(token)
    }

    async fn ticket(&self, software_type: &str) -> SoftwareResult<DownloadTicket> {
        Ok(call(
            &self.bus,
            modules::EDGE_INSTALLER,
            modules::SOFTWARE_MANAGER,
            Operation::Get,
            RES_INNER_DOWNLOAD_TICKET,
            &TicketReq {
                software_type: software_type.to_string(),
            },
        )
        .await?)
    }

    async fn to_edge<T: Serialize>(&self, resource: &str, serial: &str, body: &T) -> SoftwareResult<()> {
        let msg = Message::with_body(
            modules::EDGE_INSTALLER,
            modules::EDGE_CONNECTOR,
            Operation::Post,
            resource,
            body,
        )?
        .with_node_id(serial);
        if let Err(e) = self.bus.send(msg).await {
            warn!(node = %serial, %resource, error = %e, "edge message not sent");
            return Err(e.into());
        }
        Ok(())
    }
}

fn check_serial(serial: &str) -> Result<(), ValidationError> {
    if serial.is_empty() {
        return Err(ValidationError::new("nodeId", "message carries no node id"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use edgefleet_bus::{HandlerTable, call_resp, run_module};
    use edgefleet_core::config::SoftwareConfig;
    use edgefleet_core::{Coded, ErrorCode};
    use edgefleet_state::StateStore;
    use tokio::sync::{mpsc, watch};

    use crate::cipher::CredentialCipher;
    use crate::error::SoftwareError;
    use crate::manager::{AuthInfoReq, SoftwareManager};
    use crate::module::{installer_handlers, software_handlers};
    use crate::urls::{SoftwareUrl, UrlListReq};

    struct Harness {
        bus: ModuleBus,
        installer: Arc<EdgeInstaller>,
        edge: mpsc::UnboundedReceiver<Message>,
        _dir: tempfile::TempDir,
        _shutdown: watch::Sender<bool>,
    }

    fn summary(id: u64, serial: &str) -> NodeSummary {
        NodeSummary {
            id,
            node_name: format!("edge-{id:02}"),
            unique_name: format!("edge-{id:02}"),
            serial_number: serial.to_string(),
            ip_address: String::new(),
            is_managed: true,
        }
    }

    /// Software manager with one edgecore URL and a credential, a node
    /// manager knowing nodes 1 (SN-1) and 2 (no serial), a config manager
    /// holding a token, and an edge link forwarding to the test.
    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let bus = ModuleBus::new(Duration::from_millis(500));
        let (shutdown, rx) = watch::channel(false);

        let cipher = CredentialCipher::load_or_create(&dir.path().join("software.key")).unwrap();
        let software = SoftwareManager::with_cipher(
            StateStore::open_in_memory().unwrap(),
            cipher,
            &SoftwareConfig::default(),
        )
        .unwrap();
        software
            .add_urls(UrlListReq {
                software_type: "edgecore".into(),
                urls: vec![SoftwareUrl {
                    software_type: String::new(),
                    url: "https://repo.example.com/edgecore-1.2.0.tar.gz".into(),
                    version: "1.2.0".into(),
                    created_at: String::new(),
                }],
            })
            .unwrap();
        software
            .set_auth_info(AuthInfoReq {
                username: "fetcher".into(),
                password: "Pa55-word".into(),
            })
            .unwrap();
        let mailbox = bus.register(modules::SOFTWARE_MANAGER).unwrap();
        tokio::spawn(run_module(
            bus.clone(),
            mailbox,
            Arc::new(software_handlers(Arc::new(software))),
            rx.clone(),
        ));

        let nodes = HandlerTable::new(Arc::new(())).route_json(
            Operation::Get,
            RES_INNER_NODE_BY_ID,
            |_, req: NodeIdReq| async move {
                match req.node_id {
                    1 => Ok(summary(1, "SN-1")),
                    2 => Ok(summary(2, "")),
                    id => Err(SoftwareError::NotFound(format!("node {id}"))),
                }
            },
        );
        let mailbox = bus.register(modules::NODE_MANAGER).unwrap();
        tokio::spawn(run_module(bus.clone(), mailbox, Arc::new(nodes), rx.clone()));

        let config = HandlerTable::new(Arc::new(())).route_json(
            Operation::Get,
            RES_INNER_TOKEN,
            |_, _: serde_json::Value| async move {
                Ok::<_, SoftwareError>(TokenResp {
                    token: "ab".repeat(32),
                    salt: "cd".repeat(16),
                    expire_time: 4_000_000_000,
                })
            },
        );
        let mailbox = bus.register(modules::CONFIG_MANAGER).unwrap();
        tokio::spawn(run_module(bus.clone(), mailbox, Arc::new(config), rx.clone()));

        let installer = Arc::new(EdgeInstaller::new(bus.clone()));
        let mailbox = bus.register(modules::EDGE_INSTALLER).unwrap();
        tokio::spawn(run_module(
            bus.clone(),
            mailbox,
            Arc::new(installer_handlers(installer.clone())),
            rx.clone(),
        ));

        let (tx, edge) = mpsc::unbounded_channel();
        let mut link = bus.register(modules::EDGE_CONNECTOR).unwrap();
        tokio::spawn(async move {
            while let Some(msg) = link.recv().await {
                if tx.send(msg).is_err() {
                    break;
                }
            }
        });

        Harness {
            bus,
            installer,
            edge,
            _dir: dir,
            _shutdown: shutdown,
        }
    }

    #[tokio::test]
    async fn upgrade_fans_out_to_nodes_with_serials() {
        let mut h = harness().await;
        let batch = h
            .installer
            .upgrade(UpgradeReq {
                node_ids: vec![1, 2, 3],
                software_type: "edgecore".into(),
            })
            .await
            .unwrap();
        assert_eq!(batch.success_ids, vec![1]);
        assert_eq!(batch.failed_infos.len(), 2);
        assert!(batch.failed_infos[&2].contains("serial"));

        let msg = h.edge.recv().await.unwrap();
        assert_eq!(msg.header.node_id, "SN-1");
        assert_eq!(msg.router.resource, RES_EDGE_UPGRADE);
        let ticket: DownloadTicket = msg.decode().unwrap();
        assert_eq!(ticket.version, "1.2.0");
        assert_eq!(ticket.username, "fetcher");
        assert!(h.edge.try_recv().is_err());
    }

    #[tokio::test]
    async fn upgrade_of_unknown_type_fails_whole_request() {
        let h = harness().await;
        let err = h
            .installer
            .upgrade(UpgradeReq {
                node_ids: vec![1],
                software_type: "edge-installer".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RecordNotFound);
    }

    #[tokio::test]
    async fn edge_requests_are_answered_over_the_link() {
        let mut h = harness().await;
        let ask = Message::with_body(
            modules::EDGE_CONNECTOR,
            modules::EDGE_INSTALLER,
            Operation::Get,
            RES_EDGE_DOWNLOAD_INFO,
            &TicketReq {
                software_type: "edgecore".into(),
            },
        )
        .unwrap()
        .with_node_id("SN-7");
        h.bus.send(ask).await.unwrap();
        let msg = h.edge.recv().await.unwrap();
        assert_eq!(msg.header.node_id, "SN-7");
        assert_eq!(msg.router.resource, RES_EDGE_DOWNLOAD_INFO);

        let token = h.installer.edge_token("SN-7").await.unwrap();
        assert_eq!(token.salt.len(), 32);
        let msg = h.edge.recv().await.unwrap();
        assert_eq!(msg.router.resource, RES_EDGE_TOKEN);
        assert_eq!(msg.decode::<TokenResp>().unwrap(), token);
    }

    #[tokio::test]
    async fn edge_request_without_node_id_is_rejected() {
        let h = harness().await;
        let resp = call_resp(
            &h.bus,
            modules::EDGE_CONNECTOR,
            modules::EDGE_INSTALLER,
            Operation::Get,
            RES_EDGE_TOKEN,
            &serde_json::Value::Null,
        )
        .await
        .unwrap();
        assert_eq!(resp.code(), Some(ErrorCode::ParamInvalid));
    }
}
