//! # Error Types
//!
//! Errors raised while decoding identities, frames and payloads.

use thiserror::Error;

/// Raw bytes could not be turned into a [`crate::PeerId`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerIdError {
    /// Peer IDs are exactly 32 bytes.
    #[error("invalid peer id length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Failure encoding or decoding a whole `MessageBody` frame.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Failure encoding or decoding a capability payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to marshal payload: {0}")]
    Marshal(String),

    #[error("failed to unmarshal payload: {0}")]
    Unmarshal(String),
}

/// A workflow or execution identifier is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid id length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("id must be lowercase or uppercase hex")]
    NotHex,
}
