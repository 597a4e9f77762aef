//! # In-Memory Broker
//!
//! Connects any number of nodes inside one process. Each registered node owns
//! a bounded inbox of wire-encoded frames and a single delivery task that
//! decodes frames and routes them to the receiver registered for
//! `(capability_id, capability_don_id)`.

use crate::dispatcher::{Dispatcher, Receiver, TransportError};
use crate::DEFAULT_INBOX_CAPACITY;
use capability_types::{MessageBody, PeerId, PROTOCOL_VERSION};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Route = (String, u32);

/// Unix milliseconds, used to stamp outbound frames.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Inbox senders of every node, shared by all dispatchers.
#[derive(Default)]
struct Inboxes {
    by_peer: RwLock<HashMap<PeerId, mpsc::Sender<Vec<u8>>>>,
}

/// A node's view of the broker: its dispatcher and its routing table.
pub struct NodeDispatcher {
    peer_id: PeerId,
    inboxes: Arc<Inboxes>,
    receivers: RwLock<HashMap<Route, Arc<dyn Receiver>>>,
}

impl NodeDispatcher {
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Route frames for `capability_id` on `don_id` to `receiver`.
    pub fn set_receiver(
        &self,
        capability_id: &str,
        don_id: u32,
        receiver: Arc<dyn Receiver>,
    ) -> Result<(), TransportError> {
        let mut receivers = self.receivers.write();
        let route = (capability_id.to_string(), don_id);
        if receivers.contains_key(&route) {
            return Err(TransportError::ReceiverExists {
                capability_id: capability_id.to_string(),
                don_id,
            });
        }
        receivers.insert(route, receiver);
        Ok(())
    }

    pub fn remove_receiver(&self, capability_id: &str, don_id: u32) {
        self.receivers
            .write()
            .remove(&(capability_id.to_string(), don_id));
    }

    async fn deliver(&self, frame: Vec<u8>) {
        let msg = match MessageBody::decode(&frame) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(peer = %self.peer_id, %err, "dropping undecodable frame");
                return;
            }
        };

        let receiver = self
            .receivers
            .read()
            .get(&(msg.capability_id.clone(), msg.capability_don_id))
            .cloned();

        match receiver {
            Some(receiver) => receiver.receive(msg).await,
            None => debug!(
                peer = %self.peer_id,
                capability_id = %msg.capability_id,
                don_id = msg.capability_don_id,
                "no receiver for capability, dropping message"
            ),
        }
    }
}

impl Dispatcher for NodeDispatcher {
    fn send(&self, peer: PeerId, mut msg: MessageBody) -> Result<(), TransportError> {
        msg.version = PROTOCOL_VERSION;
        msg.sender = self.peer_id.as_bytes().to_vec();
        msg.receiver = peer.as_bytes().to_vec();
        msg.timestamp = unix_millis();

        let frame = msg.encode()?;
        let inbox = self
            .inboxes
            .by_peer
            .read()
            .get(&peer)
            .cloned()
            .ok_or(TransportError::UnknownPeer(peer))?;

        inbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(peer),
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed(peer),
        })
    }
}

/// Process-local transport connecting registered nodes.
pub struct InMemoryBroker {
    inboxes: Arc<Inboxes>,
    capacity: usize,
    /// Inboxes registered before `start()`.
    pending: Mutex<Vec<(Arc<NodeDispatcher>, mpsc::Receiver<Vec<u8>>)>>,
    started: AtomicBool,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inboxes: Arc::new(Inboxes::default()),
            capacity: capacity.max(1),
            pending: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stop: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Attach a node. Its delivery task runs once the broker is started.
    pub fn register_node(&self, peer_id: PeerId) -> Arc<NodeDispatcher> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let node = Arc::new(NodeDispatcher {
            peer_id,
            inboxes: self.inboxes.clone(),
            receivers: RwLock::new(HashMap::new()),
        });
        self.inboxes.by_peer.write().insert(peer_id, tx);

        if self.started.load(Ordering::SeqCst) {
            self.spawn_delivery(node.clone(), rx);
        } else {
            self.pending.lock().push((node.clone(), rx));
        }
        node
    }

    /// Detach a node; later sends to it fail with `UnknownPeer`.
    pub fn remove_node(&self, peer_id: &PeerId) {
        self.inboxes.by_peer.write().remove(peer_id);
    }

    /// Start delivering. Calling it twice is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        for (node, rx) in pending {
            self.spawn_delivery(node, rx);
        }
    }

    /// Stop every delivery task and wait for them to exit.
    pub async fn close(&self) {
        self.stop.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    fn spawn_delivery(&self, node: Arc<NodeDispatcher>, mut inbox: mpsc::Receiver<Vec<u8>>) {
        let stop = self.stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    frame = inbox.recv() => match frame {
                        Some(frame) => node.deliver(frame).await,
                        None => break,
                    },
                }
            }
        });
        self.tasks.lock().push(handle);
    }
}
