//! Handler tables and the per-module receive loop.
//!
//! A module builds one [`HandlerTable`] at construction time, keyed by
//! `(Operation, resource)`, and hands it to [`run_module`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use edgefleet_core::{Coded, ErrorCode, RespMsg};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::{Mailbox, ModuleBus};
use crate::message::{Message, Operation};

type BoxFuture = Pin<Box<dyn Future<Output = RespMsg> + Send>>;

/// Type-erased handler: takes the request message, yields the response.
pub type Handler = Arc<dyn Fn(Message) -> BoxFuture + Send + Sync>;

pub struct HandlerTable<S> {
    state: Arc<S>,
    routes: HashMap<(Operation, String), Handler>,
}

impl<S: Send + Sync + 'static> HandlerTable<S> {
    pub fn new(state: Arc<S>) -> Self {
        Self {
            state,
            routes: HashMap::new(),
        }
    }

    /// Register a handler that sees the raw message.
    pub fn route<F, Fut>(mut self, operation: Operation, resource: &str, handler: F) -> Self
    where
        F: Fn(Arc<S>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RespMsg> + Send + 'static,
    {
        let state = self.state.clone();
        let handler: Handler = Arc::new(move |msg| Box::pin(handler(state.clone(), msg)));
        self.routes.insert((operation, resource.to_string()), handler);
        self
    }

    /// Register a handler whose request body is decoded into `Req` and
    /// whose result is turned into a response. A body that fails to decode
    /// is answered with `ParamConvert` without calling the handler.
    pub fn route_json<Req, T, E, F, Fut>(self, operation: Operation, resource: &str, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        T: Serialize,
        E: Coded,
        F: Fn(Arc<S>, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.route(operation, resource, move |state, msg| {
            let handler = handler.clone();
            async move {
                match msg.decode::<Req>() {
                    Ok(req) => RespMsg::from(handler(state, req).await),
                    Err(e) => RespMsg::fail(ErrorCode::ParamConvert, e.to_string()),
                }
            }
        })
    }

    pub fn get(&self, operation: Operation, resource: &str) -> Option<Handler> {
        self.routes
            .get(&(operation, resource.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Resolve and run the handler for `msg`.
pub async fn dispatch<S: Send + Sync + 'static>(table: &HandlerTable<S>, msg: Message) -> RespMsg {
    match table.get(msg.router.operation, &msg.router.resource) {
        Some(handler) => handler(msg).await,
        None => RespMsg::fail(
            ErrorCode::ParamInvalid,
            format!(
                "no handler for {} {}",
                msg.router.operation, msg.router.resource
            ),
        ),
    }
}

/// Receive loop for one module. Each message runs on its own task so a slow
/// handler never blocks the inbox; sync requests get their reply sent back
/// over the bus. Returns when `shutdown` flips or the mailbox closes, and
/// unregisters the module on the way out.
pub async fn run_module<S: Send + Sync + 'static>(
    bus: ModuleBus,
    mut mailbox: Mailbox,
    table: Arc<HandlerTable<S>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = mailbox.name().to_string();
    info!(module = %name, routes = table.len(), "module started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            msg = mailbox.recv() => {
                let Some(msg) = msg else { break };
                let bus = bus.clone();
                let table = table.clone();
                tokio::spawn(async move {
                    handle_one(bus, table, msg).await;
                });
            }
        }
    }

    bus.unregister(&name);
    info!(module = %name, "module stopped");
}

async fn handle_one<S: Send + Sync + 'static>(bus: ModuleBus, table: Arc<HandlerTable<S>>, msg: Message) {
    let is_sync = msg.header.is_sync;
    let request = msg.clone();
    debug!(
        source = %msg.router.source,
        operation = %msg.router.operation,
        resource = %msg.router.resource,
        "handling message"
    );
    let resp = dispatch(&table, msg).await;
    if !resp.is_success() {
        debug!(resource = %request.router.resource, status = %resp.status, msg = %resp.msg, "handler failed");
    }
    if !is_sync {
        return;
    }
    let content = match serde_json::to_value(&resp) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "cannot encode response");
            return;
        }
    };
    if let Err(e) = bus.send(request.reply(content)).await {
        warn!(to = %request.router.source, error = %e, "failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::call;
    use crate::error::BusError;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counter {
        value: AtomicU64,
    }

    #[derive(Deserialize)]
    struct Add {
        by: u64,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("too large")]
    struct TooLarge;

    impl Coded for TooLarge {
        fn code(&self) -> ErrorCode {
            ErrorCode::CheckFailed
        }
    }

    fn table() -> Arc<HandlerTable<Counter>> {
        Arc::new(
            HandlerTable::new(Arc::new(Counter::default()))
                .route_json(Operation::Post, "/add", |c: Arc<Counter>, req: Add| async move {
                    if req.by > 100 {
                        return Err(TooLarge);
                    }
                    Ok(c.value.fetch_add(req.by, Ordering::SeqCst) + req.by)
                })
                .route(Operation::Get, "/value", |c, _msg| async move {
                    RespMsg::ok(c.value.load(Ordering::SeqCst))
                }),
        )
    }

    async fn start() -> (ModuleBus, watch::Sender<bool>) {
        let bus = ModuleBus::new(Duration::from_millis(500));
        let mailbox = bus.register("Counter").unwrap();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(run_module(bus.clone(), mailbox, table(), rx));
        (bus, tx)
    }

    #[tokio::test]
    async fn typed_route_round_trip() {
        let (bus, _tx) = start().await;
        let total: u64 = call(&bus, "Test", "Counter", Operation::Post, "/add", &serde_json::json!({"by": 5}))
            .await
            .unwrap();
        assert_eq!(total, 5);
        let value: u64 = call(&bus, "Test", "Counter", Operation::Get, "/value", &())
            .await
            .unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn handler_error_surfaces_code() {
        let (bus, _tx) = start().await;
        let err = call::<_, u64>(&bus, "Test", "Counter", Operation::Post, "/add", &serde_json::json!({"by": 500}))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Remote { code: ErrorCode::CheckFailed, .. }));
    }

    #[tokio::test]
    async fn bad_body_is_param_convert() {
        let (bus, _tx) = start().await;
        let err = call::<_, u64>(&bus, "Test", "Counter", Operation::Post, "/add", &"nope")
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Remote { code: ErrorCode::ParamConvert, .. }));
    }

    #[tokio::test]
    async fn unknown_route_is_param_invalid() {
        let (bus, _tx) = start().await;
        let err = call::<_, u64>(&bus, "Test", "Counter", Operation::Delete, "/add", &())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Remote { code: ErrorCode::ParamInvalid, .. }));
    }

    #[tokio::test]
    async fn shutdown_unregisters_module() {
        let (bus, tx) = start().await;
        tx.send(true).unwrap();
        for _ in 0..50 {
            if !bus.is_registered("Counter") {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("module still registered after shutdown");
    }
}
