//! Bus routes served by the app manager.

use std::sync::Arc;

use edgefleet_bus::routes::*;
use edgefleet_bus::{HandlerTable, Operation};
use edgefleet_core::inner::{GroupIdReq, GroupIdsReq, NodeIdReq};
use edgefleet_core::{BatchResp, Coded, ErrorCode, ListRequest, RespMsg};

use crate::error::{AppError, AppResult};
use crate::manager::AppManager;
use crate::types::*;

pub fn handlers(manager: Arc<AppManager>) -> HandlerTable<AppManager> {
    HandlerTable::new(manager)
        // Applications
        .route_json(Operation::Post, RES_APP, |m, req: CreateAppReq| async move {
            m.create_app(req)
        })
        .route_json(Operation::Get, RES_APP, |m, req: AppIdReq| async move {
            m.get_app(req)
        })
        .route_json(Operation::Update, RES_APP, |m, req: UpdateAppReq| async move {
            m.update_app(req).await
        })
        .route_json(Operation::Get, RES_APP_LIST, |m, req: ListRequest| async move {
            m.list_apps(req)
        })
        .route(Operation::Delete, RES_APP_BATCH_DELETE, |m, msg| async move {
            match msg.decode::<AppIdsReq>() {
                Ok(req) => batch_resp(m.delete_apps(req)),
                Err(e) => RespMsg::from_error(&e),
            }
        })
        .route(Operation::Post, RES_APP_DEPLOY, |m, msg| async move {
            match msg.decode::<DeployReq>() {
                Ok(req) => match m.deploy_app(req).await {
                    Ok(batch) => RespMsg::ok(batch),
                    Err(AppError::DeployFailed { group_id, source, batch }) => {
                        let msg = format!("deploy into node group {group_id} failed: {source}");
                        RespMsg::fail_with(source.code(), msg, batch)
                    }
                    Err(e) => RespMsg::from_error(&e),
                },
                Err(e) => RespMsg::from_error(&e),
            }
        })
        .route(Operation::Post, RES_APP_UNDEPLOY, |m, msg| async move {
            match msg.decode::<DeployReq>() {
                Ok(req) => batch_resp(m.undeploy_app(req).await),
                Err(e) => RespMsg::from_error(&e),
            }
        })
        // Instances
        .route_json(Operation::Get, RES_APP_INSTANCE_LIST, |m, req: ListRequest| async move {
            m.list_instances(req).await
        })
        .route_json(Operation::Get, RES_APP_INSTANCE_BY_NODE, |m, req: NodeIdReq| async move {
            m.instances_by_node(req).await
        })
        .route_json(Operation::Get, RES_APP_INSTANCE_BY_APP, |m, req: AppIdReq| async move {
            m.instances_of_app(req).await
        })
        // Templates
        .route_json(Operation::Post, RES_APP_TEMPLATE, |m, req: CreateAppReq| async move {
            m.create_template(req)
        })
        .route_json(Operation::Get, RES_APP_TEMPLATE, |m, req: TemplateIdReq| async move {
            m.get_template(req)
        })
        .route_json(
            Operation::Update,
            RES_APP_TEMPLATE,
            |m, req: UpdateTemplateReq| async move { m.update_template(req) },
        )
        .route_json(Operation::Get, RES_APP_TEMPLATE_LIST, |m, req: ListRequest| async move {
            m.list_templates(req)
        })
        .route(Operation::Delete, RES_APP_TEMPLATE_BATCH_DELETE, |m, msg| async move {
            match msg.decode::<TemplateIdsReq>() {
                Ok(req) => batch_resp(m.delete_templates(req)),
                Err(e) => RespMsg::from_error(&e),
            }
        })
        // Configmaps
        .route_json(
            Operation::Post,
            RES_CONFIGMAP,
            |m, req: CreateConfigmapReq| async move { m.create_configmap(req).await },
        )
        .route_json(Operation::Get, RES_CONFIGMAP, |m, req: ConfigmapIdReq| async move {
            m.get_configmap(req)
        })
        .route_json(
            Operation::Update,
            RES_CONFIGMAP,
            |m, req: UpdateConfigmapReq| async move { m.update_configmap(req).await },
        )
        .route_json(Operation::Get, RES_CONFIGMAP_LIST, |m, req: ListRequest| async move {
            m.list_configmaps(req)
        })
        .route(Operation::Delete, RES_CONFIGMAP_BATCH_DELETE, |m, msg| async move {
            match msg.decode::<ConfigmapIdsReq>() {
                Ok(req) => batch_resp(m.delete_configmaps(req).await),
                Err(e) => RespMsg::from_error(&e),
            }
        })
        // Inner
        .route_json(
            Operation::Get,
            RES_INNER_INSTANCE_COUNT_BY_GROUPS,
            |m, req: GroupIdsReq| async move { m.instance_counts(req) },
        )
        .route_json(
            Operation::Get,
            RES_INNER_GROUP_POD_RESOURCES,
            |m, req: GroupIdReq| async move { m.group_pod_resources(req) },
        )
}

fn batch_resp(result: AppResult<BatchResp>) -> RespMsg {
    match result {
        Ok(batch) => batch.into_resp(ErrorCode::Internal),
        Err(e) => RespMsg::from_error(&e),
    }
}
