//! Bus routes served by the node manager.

use std::sync::Arc;

use edgefleet_bus::routes::*;
use edgefleet_bus::{HandlerTable, Operation};
use edgefleet_core::inner::{
    CheckGroupResourcesReq, GroupIdReq, GroupIdsReq, NodeIdReq, SoftwareReport, UniqueNameReq,
    UpdateGroupResourcesReq,
};
use edgefleet_core::{BatchResp, ErrorCode, ListRequest, RespMsg};

use crate::error::{NodeError, NodeResult};
use crate::manager::NodeManager;
use crate::types::*;

pub fn handlers(manager: Arc<NodeManager>) -> HandlerTable<NodeManager> {
    HandlerTable::new(manager)
        // Nodes
        .route_json(Operation::Post, RES_NODE, |m, req: CreateNodeReq| async move {
            m.create_node(req)
        })
        .route_json(Operation::Get, RES_NODE, |m, req: NodeIdReq| async move {
            m.node_detail(req).await
        })
        .route_json(Operation::Update, RES_NODE, |m, req: ModifyNodeReq| async move {
            m.modify_node(req)
        })
        .route_json(Operation::Get, RES_NODE_LIST, |m, req: ListRequest| async move {
            m.list_nodes(req)
        })
        .route_json(
            Operation::Get,
            RES_NODE_UNMANAGED_LIST,
            |m, req: ListRequest| async move { m.list_unmanaged_nodes(req).await },
        )
        .route_json(Operation::Post, RES_NODE_PROMOTE, |m, req: PromoteNodeReq| async move {
            m.promote_node(req).await
        })
        .route(Operation::Delete, RES_NODE_BATCH_DELETE, |m, msg| async move {
            match msg.decode::<NodeIdsReq>() {
                Ok(req) => batch_resp(m.batch_delete_nodes(req).await),
                Err(e) => RespMsg::from_error(&e),
            }
        })
        .route(Operation::Delete, RES_NODE_UNMANAGED_BATCH_DELETE, |m, msg| async move {
            match msg.decode::<NodeIdsReq>() {
                Ok(req) => batch_resp(m.batch_delete_unmanaged_nodes(req).await),
                Err(e) => RespMsg::from_error(&e),
            }
        })
        .route_json(
            Operation::Get,
            RES_NODE_STATISTICS,
            |m, _: serde_json::Value| async move { m.node_statistics() },
        )
        // Node groups
        .route_json(Operation::Post, RES_NODE_GROUP, |m, req: CreateGroupReq| async move {
            m.create_group(req)
        })
        .route_json(Operation::Get, RES_NODE_GROUP, |m, req: GroupIdReq| async move {
            m.group_detail(req)
        })
        .route_json(Operation::Update, RES_NODE_GROUP, |m, req: ModifyGroupReq| async move {
            m.modify_group(req)
        })
        .route_json(Operation::Get, RES_NODE_GROUP_LIST, |m, req: ListRequest| async move {
            m.list_groups(req)
        })
        .route(Operation::Delete, RES_NODE_GROUP_BATCH_DELETE, |m, msg| async move {
            match msg.decode::<GroupIdsReq>() {
                Ok(req) => batch_resp(m.batch_delete_groups(req).await),
                Err(e) => RespMsg::from_error(&e),
            }
        })
        .route_json(
            Operation::Get,
            RES_NODE_GROUP_STATISTICS,
            |m, _: serde_json::Value| async move { m.group_statistics() },
        )
        // Relations
        .route_json(Operation::Post, RES_NODE_RELATION, |m, req: AddRelationReq| async move {
            m.add_relation(req).await
        })
        .route(Operation::Delete, RES_NODE_RELATION_BATCH_DELETE, |m, msg| async move {
            match msg.decode::<DeleteRelationReq>() {
                Ok(req) => match m.delete_relation(req).await {
                    Ok(batch) if batch.failed.is_empty() => RespMsg::ok(batch),
                    Ok(batch) => {
                        let msg = format!(
                            "{} of {} failed",
                            batch.failed.len(),
                            batch.failed.len() + batch.success.len()
                        );
                        RespMsg::fail_with(ErrorCode::Internal, msg, batch)
                    }
                    Err(e) => RespMsg::from_error(&e),
                },
                Err(e) => RespMsg::from_error(&e),
            }
        })
        // Inner
        .route_json(
            Operation::Get,
            RES_INNER_NODE_BY_UNIQUE_NAME,
            |m, req: UniqueNameReq| async move { m.node_by_unique_name(req) },
        )
        .route_json(Operation::Get, RES_INNER_NODE_BY_ID, |m, req: NodeIdReq| async move {
            m.node_by_id(req)
        })
        .route_json(
            Operation::Get,
            RES_INNER_NODE_STATUS,
            |m, req: UniqueNameReq| async move { Ok::<_, NodeError>(m.node_status(req)) },
        )
        .route_json(
            Operation::Get,
            RES_INNER_ALL_NODES,
            |m, _: serde_json::Value| async move { m.all_nodes() },
        )
        .route_json(Operation::Get, RES_INNER_NODE_SOFTWARE, |m, req: NodeIdReq| async move {
            m.node_software(req)
        })
        .route_json(Operation::Get, RES_INNER_NODES_IN_GROUP, |m, req: GroupIdReq| async move {
            m.nodes_in_group(req)
        })
        .route_json(Operation::Get, RES_INNER_GROUPS_BY_IDS, |m, req: GroupIdsReq| async move {
            m.groups_by_ids(req)
        })
        .route_json(
            Operation::Get,
            RES_INNER_CHECK_GROUP_RESOURCES,
            |m, req: CheckGroupResourcesReq| async move { m.check_group_resources(req).await },
        )
        .route_json(
            Operation::Update,
            RES_INNER_UPDATE_GROUP_RESOURCES,
            |m, req: UpdateGroupResourcesReq| async move { m.update_group_resources(req) },
        )
        .route_json(
            Operation::Report,
            RES_SOFTWARE_INFO,
            |m, report: SoftwareReport| async move { m.update_node_software(report) },
        )
}

fn batch_resp(result: NodeResult<BatchResp>) -> RespMsg {
    match result {
        Ok(batch) => batch.into_resp(ErrorCode::Internal),
        Err(e) => RespMsg::from_error(&e),
    }
}
