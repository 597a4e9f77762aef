//! # MessageBody Frame
//!
//! The unit exchanged between peers. Produced by a component on the sender,
//! consumed by the matching component on the receiver via `method` dispatch.
//!
//! ## Field Authority
//!
//! - `version`, `sender`, `receiver`, `timestamp` are stamped by the transport.
//! - `message_id` correlates an executable request with its responses.
//! - `error`/`error_msg` are only meaningful on executable responses.

use crate::errors::{CodecError, PeerIdError};
use crate::entities::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current protocol version for remote capability messages.
pub const PROTOCOL_VERSION: u32 = 1;

/// Wire methods.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[default]
    Execute,
    RegisterToWorkflow,
    UnregisterFromWorkflow,
    RegisterTrigger,
    TriggerEvent,
}

impl Method {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Execute => "Execute",
            Method::RegisterToWorkflow => "RegisterToWorkflow",
            Method::UnregisterFromWorkflow => "UnregisterFromWorkflow",
            Method::RegisterTrigger => "RegisterTrigger",
            Method::TriggerEvent => "TriggerEvent",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome code carried by executable responses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    Ok,
    /// Quorum never formed before the server's deadline.
    Timeout,
    /// The underlying capability failed.
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Ok => f.write_str("OK"),
            ErrorCode::Timeout => f.write_str("TIMEOUT"),
            ErrorCode::InternalError => f.write_str("INTERNAL_ERROR"),
        }
    }
}

/// Routing metadata of a (possibly batched) trigger event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEventMetadata {
    /// Workflows on the receiving node that should get this event.
    pub workflow_ids: Vec<String>,
    pub trigger_event_id: String,
}

/// The wire unit exchanged between peers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub version: u32,
    pub capability_id: String,
    pub capability_don_id: u32,
    pub caller_don_id: u32,
    pub method: Method,
    pub message_id: Vec<u8>,
    pub sender: Vec<u8>,
    pub receiver: Vec<u8>,
    /// Capability-specific bytes.
    pub payload: Vec<u8>,
    /// Sender clock, unix milliseconds.
    pub timestamp: i64,
    pub error: ErrorCode,
    pub error_msg: String,
    pub trigger_event_metadata: Option<TriggerEventMetadata>,
}

impl MessageBody {
    /// Parse the transport-stamped sender.
    pub fn sender_peer_id(&self) -> Result<PeerId, PeerIdError> {
        PeerId::try_from(self.sender.as_slice())
    }

    /// Parse the transport-stamped receiver.
    pub fn receiver_peer_id(&self) -> Result<PeerId, PeerIdError> {
        PeerId::try_from(self.receiver.as_slice())
    }

    /// Encode the whole frame for the wire.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode a frame received from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
