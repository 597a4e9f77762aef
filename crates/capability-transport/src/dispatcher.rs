//! # Transport Ports
//!
//! `Dispatcher` is how a component sends; `Receiver` is how a component is
//! handed inbound frames. Components never see the underlying network.

use async_trait::async_trait;
use capability_types::{CodecError, MessageBody, PeerId};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised when handing a frame to the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No node with this peer ID is reachable.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// The peer's inbound queue is full; the frame was dropped.
    #[error("inbound queue of peer {0} is full")]
    QueueFull(PeerId),

    /// The peer's delivery task has stopped.
    #[error("peer {0} is no longer receiving")]
    Closed(PeerId),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A receiver is already routed for this capability on this node.
    #[error("receiver already set for capability {capability_id} on DON {don_id}")]
    ReceiverExists { capability_id: String, don_id: u32 },
}

/// Outbound half of the transport.
///
/// `send` is fire-and-forget: it returns once the frame is queued for the
/// peer. It stamps `version`, `sender`, `receiver` and `timestamp`.
pub trait Dispatcher: Send + Sync {
    fn send(&self, peer: PeerId, msg: MessageBody) -> Result<(), TransportError>;
}

/// Inbound half of the transport, implemented by every protocol component.
///
/// Called from the node's delivery task; implementations must return
/// promptly and push slow work onto their own tasks.
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn receive(&self, msg: MessageBody);
}

impl<T: Dispatcher + ?Sized> Dispatcher for Arc<T> {
    fn send(&self, peer: PeerId, msg: MessageBody) -> Result<(), TransportError> {
        (**self).send(peer, msg)
    }
}
