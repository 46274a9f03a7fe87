//! Bus routes served by the software manager and the edge installer.

use std::sync::Arc;

use edgefleet_bus::routes::{
    RES_EDGE_DOWNLOAD_INFO, RES_EDGE_TOKEN, RES_INNER_DOWNLOAD_TICKET, RES_SOFTWARE_AUTH,
    RES_SOFTWARE_UPGRADE, RES_SOFTWARE_URL,
};
use edgefleet_bus::{HandlerTable, Operation};
use edgefleet_core::inner::TicketReq;
use edgefleet_core::{ErrorCode, RespMsg};

use crate::installer::{EdgeInstaller, UpgradeReq};
use crate::manager::{AuthInfoReq, SoftwareManager};
use crate::urls::{SoftwareTypeReq, UrlListReq};

pub fn software_handlers(manager: Arc<SoftwareManager>) -> HandlerTable<SoftwareManager> {
    HandlerTable::new(manager)
        .route_json(Operation::Post, RES_SOFTWARE_AUTH, |m, req: AuthInfoReq| async move {
            m.set_auth_info(req)
        })
        .route_json(Operation::Post, RES_SOFTWARE_URL, |m, req: UrlListReq| async move {
            m.add_urls(req)
        })
        .route_json(Operation::Delete, RES_SOFTWARE_URL, |m, req: UrlListReq| async move {
            m.delete_urls(req)
        })
        .route_json(Operation::Update, RES_SOFTWARE_URL, |m, req: UrlListReq| async move {
            m.sync_urls(req)
        })
        .route_json(Operation::Get, RES_SOFTWARE_URL, |m, req: SoftwareTypeReq| async move {
            m.list_urls(req)
        })
        .route_json(Operation::Get, RES_INNER_DOWNLOAD_TICKET, |m, req: TicketReq| async move {
            m.download_ticket(req)
        })
}

pub fn installer_handlers(installer: Arc<EdgeInstaller>) -> HandlerTable<EdgeInstaller> {
    HandlerTable::new(installer)
        .route(Operation::Post, RES_SOFTWARE_UPGRADE, |i, msg| async move {
            match msg.decode::<UpgradeReq>() {
                Ok(req) => match i.upgrade(req).await {
                    Ok(batch) => batch.into_resp(ErrorCode::Internal),
                    Err(e) => RespMsg::from_error(&e),
                },
                Err(e) => RespMsg::from_error(&e),
            }
        })
        .route(Operation::Get, RES_EDGE_DOWNLOAD_INFO, |i, msg| async move {
            match msg.decode::<TicketReq>() {
                Ok(req) => RespMsg::from(i.download_info(&msg.header.node_id, req).await),
                Err(e) => RespMsg::from_error(&e),
            }
        })
        .route(Operation::Get, RES_EDGE_TOKEN, |i, msg| async move {
            RespMsg::from(i.edge_token(&msg.header.node_id).await)
        })
}
