//! Composition root: builds every module in dependency order, starts the
//! informers, and tears everything down on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use edgefleet_apps::{AppInformer, AppManager};
use edgefleet_bus::routes::modules;
use edgefleet_bus::{HandlerTable, Message, ModuleBus, run_module};
use edgefleet_cluster::{ClusterApi, ClusterFacade};
use edgefleet_config::ConfigManager;
use edgefleet_core::FleetConfig;
use edgefleet_nodes::{NodeInformer, NodeManager};
use edgefleet_software::{EdgeInstaller, SoftwareManager};
use edgefleet_state::StateStore;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::edge_link::EdgeLink;

pub struct Fleet {
    bus: ModuleBus,
    store: StateStore,
    nodes: Arc<NodeManager>,
    apps: Arc<AppManager>,
    config: Arc<ConfigManager>,
    software: Arc<SoftwareManager>,
    edge: EdgeLink,
    shutdown: watch::Sender<bool>,
    /// In start order; awaited in reverse.
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Fleet {
    /// Open the store named in the config and start on top of `cluster`.
    pub async fn start(config: &FleetConfig, cluster: Arc<dyn ClusterApi>) -> anyhow::Result<Self> {
        let store = StateStore::open(&config.storage.path)
            .with_context(|| format!("opening state store {}", config.storage.path.display()))?;
        info!(path = %config.storage.path.display(), "state store opened");
        Self::start_with_store(config, store, cluster).await
    }

    pub async fn start_with_store(
        config: &FleetConfig,
        store: StateStore,
        cluster: Arc<dyn ClusterApi>,
    ) -> anyhow::Result<Self> {
        let facade = ClusterFacade::new(cluster, &config.cluster);
        let bus = ModuleBus::new(Duration::from_millis(config.bus.response_timeout_ms));
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let (edge, link) = EdgeLink::start(&bus, rx.clone())?;
        tasks.push((modules::EDGE_CONNECTOR, link));

        // ── Managers ───────────────────────────────────────────────

        let node_informer = NodeInformer::new(facade.clone(), store.clone(), bus.clone(), config);
        let nodes = Arc::new(
            NodeManager::new(store.clone(), facade.clone(), bus.clone(), node_informer, config)
                .context("building node manager")?,
        );
        let app_informer = AppInformer::new(facade.clone(), store.clone(), bus.clone(), config);
        let apps = Arc::new(
            AppManager::new(store.clone(), facade.clone(), bus.clone(), app_informer, config)
                .context("building app manager")?,
        );
        let config_manager = Arc::new(
            ConfigManager::new(store.clone(), facade.clone(), bus.clone(), config)
                .context("building config manager")?,
        );
        let software = Arc::new(
            SoftwareManager::new(store.clone(), config).with_context(|| {
                format!("opening software key {}", config.software.key_file.display())
            })?,
        );
        let installer = Arc::new(EdgeInstaller::new(bus.clone()));

        // ── Modules ────────────────────────────────────────────────

        tasks.push(serve(&bus, modules::NODE_MANAGER, edgefleet_nodes::handlers(nodes.clone()), &rx)?);
        tasks.push(serve(&bus, modules::APP_MANAGER, edgefleet_apps::handlers(apps.clone()), &rx)?);
        tasks.push(serve(
            &bus,
            modules::CONFIG_MANAGER,
            edgefleet_config::handlers(config_manager.clone()),
            &rx,
        )?);
        tasks.push(serve(
            &bus,
            modules::SOFTWARE_MANAGER,
            edgefleet_software::software_handlers(software.clone()),
            &rx,
        )?);
        tasks.push(serve(
            &bus,
            modules::EDGE_INSTALLER,
            edgefleet_software::installer_handlers(installer),
            &rx,
        )?);

        // ── Informers and periodic work ────────────────────────────

        let handle = nodes
            .informer()
            .start(rx.clone())
            .await
            .context("starting node informer")?;
        tasks.push((modules::NODE_INFORMER, handle));
        // Pod sync resolves nodes through the node manager started above.
        let handle = apps
            .informer()
            .start(rx.clone())
            .await
            .context("starting app informer")?;
        tasks.push((modules::APP_INFORMER, handle));
        tasks.push(("TokenCheck", config_manager.clone().spawn_token_check(rx)));

        info!(tasks = tasks.len(), "edge fleet manager started");
        Ok(Self {
            bus,
            store,
            nodes,
            apps,
            config: config_manager,
            software,
            edge,
            shutdown,
            tasks,
        })
    }

    pub fn bus(&self) -> &ModuleBus {
        &self.bus
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn node_manager(&self) -> &Arc<NodeManager> {
        &self.nodes
    }

    pub fn app_manager(&self) -> &Arc<AppManager> {
        &self.apps
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    pub fn software_manager(&self) -> &Arc<SoftwareManager> {
        &self.software
    }

    /// Messages the control plane addresses to edge agents.
    pub fn edge_messages(&self) -> broadcast::Receiver<Message> {
        self.edge.subscribe()
    }

    /// Signal every task to stop and wait for them, newest first.
    pub async fn shutdown(mut self) {
        info!("edge fleet manager stopping");
        let _ = self.shutdown.send(true);
        while let Some((name, handle)) = self.tasks.pop() {
            if let Err(e) = handle.await {
                debug!(task = name, error = %e, "task ended abnormally");
            }
        }
        info!("edge fleet manager stopped");
    }
}

fn serve<S: Send + Sync + 'static>(
    bus: &ModuleBus,
    name: &'static str,
    table: HandlerTable<S>,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<(&'static str, JoinHandle<()>)> {
    let mailbox = bus
        .register(name)
        .with_context(|| format!("registering module {name}"))?;
    let handle = tokio::spawn(run_module(bus.clone(), mailbox, Arc::new(table), shutdown.clone()));
    Ok((name, handle))
}
