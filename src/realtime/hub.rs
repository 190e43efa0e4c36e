//! Live-client registry.
//!
//! The registry is owned by a single actor task; every mutation arrives as a
//! [`HubMessage`] over one bounded queue, so no locks are involved. Broadcasts
//! never block: a client whose outbound buffer is full is evicted, and a
//! broadcast that finds the Hub queue itself full is dropped.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// The Hub's side of a client: its id and the sending half of its outbound buffer
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    outbound: mpsc::Sender<Bytes>,
}

impl ClientHandle {
    /// New client with an outbound buffer of `capacity` messages
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, outbound }, rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }
}

#[derive(Debug)]
enum HubMessage {
    Register(ClientHandle),
    Unregister(ClientId),
    Broadcast(Bytes),
    Count(oneshot::Sender<usize>),
    Shutdown,
}

/// Cheap cloneable handle for talking to the Hub actor
#[derive(Debug, Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubMessage>,
}

/// The actor itself; drive it with [`HubRunner::run`]
pub struct HubRunner {
    rx: mpsc::Receiver<HubMessage>,
    clients: HashMap<ClientId, ClientHandle>,
}

impl Hub {
    /// Create a Hub whose inbound queue holds `capacity` messages.
    /// The runner must be spawned for anything to happen.
    pub fn new(capacity: usize) -> (Self, HubRunner) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let runner = HubRunner {
            rx,
            clients: HashMap::new(),
        };
        (Self { tx }, runner)
    }

    pub fn spawn(capacity: usize) -> (Self, JoinHandle<()>) {
        let (hub, runner) = Self::new(capacity);
        let handle = tokio::spawn(runner.run());
        (hub, handle)
    }

    /// Returns false when the Hub has stopped
    pub async fn register(&self, client: ClientHandle) -> bool {
        self.tx.send(HubMessage::Register(client)).await.is_ok()
    }

    /// Remove a client. Unknown or already removed ids are ignored.
    pub async fn unregister(&self, id: ClientId) {
        let _ = self.tx.send(HubMessage::Unregister(id)).await;
    }

    /// Queue a payload for every registered client without waiting.
    /// Returns false if the payload was dropped.
    pub fn broadcast(&self, payload: Bytes) -> bool {
        match self.tx.try_send(HubMessage::Broadcast(payload)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("hub queue full, dropping broadcast");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("hub stopped, dropping broadcast");
                false
            }
        }
    }

    /// Number of registered clients, or 0 once the Hub has stopped
    pub async fn client_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HubMessage::Count(reply)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Stop the actor; every client's outbound channel is closed
    pub async fn shutdown(&self) {
        let _ = self.tx.send(HubMessage::Shutdown).await;
    }
}

impl HubRunner {
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                HubMessage::Register(client) => {
                    debug!(client_id = client.id, "client registered");
                    self.clients.insert(client.id, client);
                }
                HubMessage::Unregister(id) => {
                    // Dropping the handle closes the outbound channel
                    if self.clients.remove(&id).is_some() {
                        debug!(client_id = id, "client unregistered");
                    }
                }
                HubMessage::Broadcast(payload) => self.broadcast(payload),
                HubMessage::Count(reply) => {
                    let _ = reply.send(self.clients.len());
                }
                HubMessage::Shutdown => break,
            }
        }

        info!(clients = self.clients.len(), "hub stopped");
    }

    fn broadcast(&mut self, payload: Bytes) {
        self.clients.retain(|id, client| {
            match client.outbound.try_send(payload.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client_id = *id, "client buffer full, evicting");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(client_id = *id, "client gone, removing");
                    false
                }
            }
        });
    }
}
