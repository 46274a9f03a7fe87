//! Test harness: an in-memory cluster, an in-memory store, and a fake
//! node manager answering the calls the app side makes.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edgefleet_bus::routes::{
    RES_INNER_CHECK_GROUP_RESOURCES, RES_INNER_NODE_BY_UNIQUE_NAME, RES_INNER_NODE_STATUS,
    RES_INNER_UPDATE_GROUP_RESOURCES, modules,
};
use edgefleet_bus::{HandlerTable, ModuleBus, Operation, run_module};
use edgefleet_cluster::{ClusterFacade, ClusterNode, MemoryCluster};
use edgefleet_core::config::{ClusterConfig, FleetConfig, LabelsConfig};
use edgefleet_core::inner::{
    CheckGroupResourcesReq, NodeRef, NodeStatusResp, UniqueNameReq, UpdateGroupResourcesReq,
};
use edgefleet_core::quantity::{CPU, MEMORY};
use edgefleet_core::{Quantity, ResourceList};
use edgefleet_state::{NewNode, StateStore};
use tokio::sync::watch;

use crate::container::Container;
use crate::error::AppError;
use crate::informer::AppInformer;
use crate::manager::AppManager;
use crate::types::CreateAppReq;

/// Stands in for the node manager on the bus.
#[derive(Default)]
pub(crate) struct FakeNodes {
    /// Groups whose admission check fails.
    pub deny_check: Mutex<HashSet<u64>>,
    /// Groups whose charge fails after admission.
    pub deny_charge: Mutex<HashSet<u64>>,
    pub not_ready: Mutex<HashSet<String>>,
}

pub(crate) struct Harness {
    pub cluster: Arc<MemoryCluster>,
    pub facade: ClusterFacade,
    pub store: StateStore,
    pub bus: ModuleBus,
    pub config: FleetConfig,
    pub nodes: Arc<FakeNodes>,
    pub manager: Arc<AppManager>,
    pub shutdown_rx: watch::Receiver<bool>,
    _shutdown: watch::Sender<bool>,
}

pub(crate) async fn harness(config: FleetConfig, workers: &[&str]) -> Harness {
    let cluster = Arc::new(MemoryCluster::new());
    let store = StateStore::open_in_memory().unwrap();
    for name in workers {
        cluster.add_node(worker(name));
        store
            .run(|db| {
                db.insert_node(&NewNode {
                    node_name: name.to_string(),
                    unique_name: name.to_string(),
                    serial_number: String::new(),
                    ip_address: String::new(),
                    description: String::new(),
                    is_managed: true,
                })
            })
            .unwrap();
    }
    let facade = ClusterFacade::new(cluster.clone(), &ClusterConfig::default())
        .with_retry(1, Duration::from_millis(1));
    let bus = ModuleBus::new(Duration::from_millis(500));
    let (shutdown, rx) = watch::channel(false);

    let nodes = Arc::new(FakeNodes::default());
    let node_store = store.clone();
    let status_nodes = nodes.clone();
    let table = HandlerTable::new(nodes.clone())
        .route_json(
            Operation::Get,
            RES_INNER_NODE_BY_UNIQUE_NAME,
            move |_, req: UniqueNameReq| {
                let store = node_store.clone();
                async move {
                    let node = store
                        .run(|db| db.find_node_by_unique_name(&req.unique_name))?
                        .ok_or_else(|| AppError::NotFound(format!("node {}", req.unique_name)))?;
                    Ok::<_, AppError>(NodeRef {
                        node_id: node.id,
                        node_name: node.node_name,
                    })
                }
            },
        )
        .route_json(
            Operation::Get,
            RES_INNER_NODE_STATUS,
            move |_, req: UniqueNameReq| {
                let nodes = status_nodes.clone();
                async move {
                    let ready = !nodes.not_ready.lock().unwrap().contains(&req.unique_name);
                    Ok::<_, AppError>(NodeStatusResp {
                        node_status: if ready { "ready" } else { "notready" }.to_string(),
                    })
                }
            },
        )
        .route_json(
            Operation::Get,
            RES_INNER_CHECK_GROUP_RESOURCES,
            |f: Arc<FakeNodes>, req: CheckGroupResourcesReq| async move {
                if f.deny_check.lock().unwrap().contains(&req.group_id) {
                    return Err(AppError::CheckFailed(format!(
                        "node group {} lacks cpu",
                        req.group_id
                    )));
                }
                Ok(())
            },
        )
        .route_json(Operation::Update, RES_INNER_UPDATE_GROUP_RESOURCES, {
            let store = store.clone();
            move |f: Arc<FakeNodes>, req: UpdateGroupResourcesReq| {
                let store = store.clone();
                async move {
                    if !req.is_undeploy && f.deny_charge.lock().unwrap().contains(&req.group_id) {
                        return Err(AppError::CheckFailed(format!(
                            "node group {} over capacity",
                            req.group_id
                        )));
                    }
                    store.transaction(|db| {
                        db.adjust_group_resources(req.group_id, &req.resources, req.is_undeploy)
                    })?;
                    Ok(())
                }
            }
        });
    let mailbox = bus.register(modules::NODE_MANAGER).unwrap();
    tokio::spawn(run_module(bus.clone(), mailbox, Arc::new(table), rx.clone()));

    let informer = AppInformer::new(facade.clone(), store.clone(), bus.clone(), &config);
    informer.start(rx.clone()).await.unwrap();
    let manager =
        AppManager::new(store.clone(), facade.clone(), bus.clone(), informer, &config).unwrap();
    Harness {
        cluster,
        facade,
        store,
        bus,
        config,
        nodes,
        manager: Arc::new(manager),
        shutdown_rx: rx,
        _shutdown: shutdown,
    }
}

pub(crate) fn worker(name: &str) -> ClusterNode {
    ClusterNode::new(name).with_ready("True").with_allocatable(
        ResourceList::new()
            .with(CPU, Quantity::from_units(8))
            .with(MEMORY, Quantity::from_megabytes(8192)),
    )
}

impl Harness {
    /// Create a group whose members are `members`, labelled in the cluster.
    pub fn group(&self, name: &str, members: &[&str]) -> u64 {
        let id = self
            .store
            .run(|db| {
                let id = db.insert_group(name, "")?;
                for member in members {
                    let node = db.find_node_by_unique_name(member)?.unwrap();
                    db.insert_relation(id, node.id)?;
                }
                Ok::<_, edgefleet_state::StateError>(id)
            })
            .unwrap();
        let key = LabelsConfig::default().group_label(id);
        for member in members {
            let node = self.cluster.node(member).unwrap().with_label(&key, "");
            self.cluster.add_node(node);
        }
        id
    }

    pub fn app(&self, name: &str, containers: Vec<Container>) -> u64 {
        self.manager
            .create_app(CreateAppReq {
                app_name: name.to_string(),
                description: String::new(),
                containers,
            })
            .unwrap()
    }

    pub fn group_cpu(&self, group_id: u64) -> Quantity {
        self.store
            .run(|db| db.get_group(group_id))
            .unwrap()
            .resources_request
            .amount(CPU)
    }

    pub fn daemon_set_count(&self) -> usize {
        self.store.run(|db| db.all_daemon_sets()).unwrap().len()
    }

    pub fn instance_count(&self) -> u64 {
        self.store.run(|db| db.count_instances()).unwrap()
    }
}

/// Poll `check` until it holds or a second passes.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
