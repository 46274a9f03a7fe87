//! Bus routes served by the config manager.

use std::sync::Arc;

use edgefleet_bus::routes::{
    RES_CERT_UPDATE, RES_IMAGE_CONFIG, RES_INNER_TOKEN, RES_INNER_TOKEN_VERIFY, RES_NODE_CHANGED,
    RES_TOKEN_EXPORT,
};
use edgefleet_bus::{HandlerTable, Operation};
use edgefleet_core::inner::{CertUpdate, NodeChanged, VerifyTokenReq};

use crate::manager::ConfigManager;
use crate::registry::ImageConfigReq;

pub fn handlers(manager: Arc<ConfigManager>) -> HandlerTable<ConfigManager> {
    HandlerTable::new(manager)
        .route_json(Operation::Post, RES_IMAGE_CONFIG, |m, req: ImageConfigReq| async move {
            m.image_config(req).await
        })
        .route_json(
            Operation::Post,
            RES_TOKEN_EXPORT,
            |m, _: serde_json::Value| async move { m.export_token() },
        )
        .route_json(
            Operation::Get,
            RES_INNER_TOKEN,
            |m, _: serde_json::Value| async move { m.get_token() },
        )
        .route_json(
            Operation::Get,
            RES_INNER_TOKEN_VERIFY,
            |m, req: VerifyTokenReq| async move { m.verify_token(req) },
        )
        .route_json(Operation::Update, RES_CERT_UPDATE, |m, req: CertUpdate| async move {
            m.update_cert(req).await
        })
        .route_json(Operation::Update, RES_NODE_CHANGED, |m, req: NodeChanged| async move {
            m.node_changed(req).await
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use edgefleet_bus::routes::modules;
    use edgefleet_bus::{BusError, ModuleBus, call, run_module};
    use edgefleet_cluster::{ClusterFacade, MemoryCluster};
    use edgefleet_core::ErrorCode;
    use edgefleet_core::config::{ClusterConfig, FleetConfig};
    use edgefleet_core::inner::TokenResp;
    use edgefleet_state::StateStore;
    use tokio::sync::watch;

    #[tokio::test]
    async fn token_routes_over_the_bus() {
        let cluster = Arc::new(MemoryCluster::new());
        let facade = ClusterFacade::new(cluster, &ClusterConfig::default());
        let store = StateStore::open_in_memory().unwrap();
        let bus = ModuleBus::new(Duration::from_millis(500));
        let manager =
            ConfigManager::new(store, facade, bus.clone(), &FleetConfig::default()).unwrap();
        let (_shutdown, rx) = watch::channel(false);
        let mailbox = bus.register(modules::CONFIG_MANAGER).unwrap();
        tokio::spawn(run_module(
            bus.clone(),
            mailbox,
            Arc::new(handlers(Arc::new(manager))),
            rx,
        ));

        let missing = call::<_, TokenResp>(
            &bus,
            "test",
            modules::CONFIG_MANAGER,
            Operation::Get,
            RES_INNER_TOKEN,
            &serde_json::Value::Null,
        )
        .await;
        assert!(matches!(
            missing,
            Err(BusError::Remote { code: ErrorCode::RecordNotFound, .. })
        ));

        let password: String = call(
            &bus,
            "test",
            modules::CONFIG_MANAGER,
            Operation::Post,
            RES_TOKEN_EXPORT,
            &serde_json::Value::Null,
        )
        .await
        .unwrap();
        let token: TokenResp = call(
            &bus,
            "test",
            modules::CONFIG_MANAGER,
            Operation::Get,
            RES_INNER_TOKEN,
            &serde_json::Value::Null,
        )
        .await
        .unwrap();
        assert_eq!(token.salt.len(), 32);

        let ok: Result<(), _> = call(
            &bus,
            "test",
            modules::CONFIG_MANAGER,
            Operation::Get,
            RES_INNER_TOKEN_VERIFY,
            &VerifyTokenReq { token: password },
        )
        .await;
        assert!(ok.is_ok());
        let wrong: Result<(), _> = call(
            &bus,
            "test",
            modules::CONFIG_MANAGER,
            Operation::Get,
            RES_INNER_TOKEN_VERIFY,
            &VerifyTokenReq { token: "nope".into() },
        )
        .await;
        assert!(matches!(
            wrong,
            Err(BusError::Remote { code: ErrorCode::CheckFailed, .. })
        ));
    }
}
