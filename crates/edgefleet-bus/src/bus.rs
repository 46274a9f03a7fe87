//! ModuleBus — the process-wide routing fabric.
//!
//! Modules register by name and receive their inbox as a [`Mailbox`].
//! Routing is by destination name only. A synchronous send parks a oneshot
//! under the request id; the first message whose `parent_id` matches is
//! handed to that waiter instead of the destination inbox.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{BusError, BusResult};
use crate::message::Message;

/// Per-module inbox depth. Senders wait when a module falls this far behind.
pub const INBOX_CAPACITY: usize = 1024;

#[derive(Default)]
struct Registry {
    modules: HashMap<String, mpsc::Sender<Message>>,
    pending: HashMap<u64, oneshot::Sender<Message>>,
}

#[derive(Clone)]
pub struct ModuleBus {
    registry: Arc<Mutex<Registry>>,
    response_timeout: Duration,
}

/// Receiving end of one registered module.
#[derive(Debug)]
pub struct Mailbox {
    name: String,
    rx: mpsc::Receiver<Message>,
}

impl Mailbox {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next message in acceptance order; `None` once unregistered.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl ModuleBus {
    pub fn new(response_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            response_timeout,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, name: &str) -> BusResult<Mailbox> {
        let mut reg = self.lock();
        if reg.modules.contains_key(name) {
            return Err(BusError::AlreadyRegistered(name.to_string()));
        }
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        reg.modules.insert(name.to_string(), tx);
        debug!(module = %name, "module registered");
        Ok(Mailbox {
            name: name.to_string(),
            rx,
        })
    }

    pub fn unregister(&self, name: &str) {
        if self.lock().modules.remove(name).is_some() {
            debug!(module = %name, "module unregistered");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().modules.contains_key(name)
    }

    /// Deliver `msg` to its waiter (replies) or its destination inbox.
    /// A reply whose caller already gave up is dropped.
    pub async fn send(&self, msg: Message) -> BusResult<()> {
        if msg.is_reply() {
            let waiter = self.lock().pending.remove(&msg.header.parent_id);
            match waiter {
                Some(waiter) => {
                    if waiter.send(msg).is_err() {
                        debug!("reply arrived after the caller gave up");
                    }
                }
                None => {
                    debug!(parent_id = msg.header.parent_id, "dropping late reply");
                }
            }
            return Ok(());
        }

        let destination = msg.router.destination.clone();
        let tx = self
            .lock()
            .modules
            .get(&destination)
            .cloned()
            .ok_or_else(|| BusError::UnknownModule(destination.clone()))?;
        tx.send(msg)
            .await
            .map_err(|_| BusError::Closed(destination))
    }

    /// Send and wait for the correlated reply for at most `timeout`.
    ///
    /// A timeout does not cancel the handler on the other side.
    pub async fn send_sync(&self, mut msg: Message, timeout: Duration) -> BusResult<Message> {
        msg.header.is_sync = true;
        let id = msg.id();
        let destination = msg.router.destination.clone();
        let resource = msg.router.resource.clone();

        let (tx, rx) = oneshot::channel();
        self.lock().pending.insert(id, tx);

        if let Err(e) = self.send(msg).await {
            self.lock().pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BusError::Closed(destination)),
            Err(_) => {
                self.lock().pending.remove(&id);
                warn!(%destination, %resource, "sync call timed out");
                Err(BusError::Timeout {
                    destination,
                    resource,
                })
            }
        }
    }

    /// [`send_sync`](Self::send_sync) with the configured response window.
    pub async fn request(&self, msg: Message) -> BusResult<Message> {
        self.send_sync(msg, self.response_timeout).await
    }
}
