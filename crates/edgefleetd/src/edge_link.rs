//! Sink for messages addressed to edge agents.
//!
//! The websocket transport to the agents lives outside this process; here
//! the `EdgeConnector` mailbox is drained, every message is logged and
//! offered to local subscribers.

use edgefleet_bus::routes::modules;
use edgefleet_bus::{BusResult, Message, ModuleBus};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Clone)]
pub struct EdgeLink {
    tx: broadcast::Sender<Message>,
}

impl EdgeLink {
    /// Register `EdgeConnector` on `bus` and drain it until `shutdown` flips.
    pub fn start(bus: &ModuleBus, mut shutdown: watch::Receiver<bool>) -> BusResult<(Self, JoinHandle<()>)> {
        let mut mailbox = bus.register(modules::EDGE_CONNECTOR)?;
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        let link = Self { tx };
        let sink = link.clone();
        let bus = bus.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    msg = mailbox.recv() => {
                        let Some(msg) = msg else { break };
                        debug!(
                            node = %msg.header.node_id,
                            source = %msg.router.source,
                            resource = %msg.router.resource,
                            "edge message queued"
                        );
                        // No subscribers is the normal case.
                        let _ = sink.tx.send(msg);
                    }
                }
            }
            bus.unregister(modules::EDGE_CONNECTOR);
            info!("edge link stopped");
        });
        Ok((link, handle))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use edgefleet_bus::Operation;

    #[tokio::test]
    async fn messages_reach_subscribers() {
        let bus = ModuleBus::new(Duration::from_millis(100));
        let (shutdown, rx) = watch::channel(false);
        let (link, handle) = EdgeLink::start(&bus, rx).unwrap();
        let mut sub = link.subscribe();

        let msg = Message::with_body("ConfigManager", modules::EDGE_CONNECTOR, Operation::Post, "/cert/download_info", &"pem")
            .unwrap()
            .with_node_id("SN-1");
        bus.send(msg).await.unwrap();
        let got = sub.recv().await.unwrap();
        assert_eq!(got.header.node_id, "SN-1");

        shutdown.send(true).unwrap();
        handle.await.unwrap();
        assert!(bus.register(modules::EDGE_CONNECTOR).is_ok());
    }
}
