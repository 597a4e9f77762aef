//! # Error Types
//!
//! `ContextDoneBeforeResponseQuorum` and `RequestExpired` are deliberately
//! separate variants: callers retry cancellation and expiry differently.

use capability_transport::TransportError;
use capability_types::{ErrorCode, PayloadError, ValidationError};
use thiserror::Error;

/// Byte-exact aggregation failed to find a large enough group.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("insufficient agreement: largest group has {found} of {required} required")]
    InsufficientAgreement { found: u32, required: u32 },
}

/// A request's transmission config could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransmissionError {
    #[error("unknown transmission schedule: {0}")]
    UnknownSchedule(String),

    #[error("invalid deltaStage {value}: {reason}")]
    InvalidDeltaStage { value: String, reason: String },

    #[error("transmission config must be an object")]
    MalformedConfig,
}

/// Errors surfaced by remote capability components.
#[derive(Debug, Error)]
pub enum RemoteCapabilityError {
    /// The caller cancelled before enough matching responses arrived.
    #[error("context done before remote client received a quorum of responses")]
    ContextDoneBeforeResponseQuorum,

    /// The request timeout elapsed before enough matching responses arrived.
    #[error("request expired before a quorum of responses was received")]
    RequestExpired,

    /// `F + 1` capability DON members reported the same failure.
    #[error("remote execution failed ({code}): {msg}")]
    RemoteExecutionFailed { code: ErrorCode, msg: String },

    #[error("request with message id {0} is already in flight")]
    DuplicateRequest(String),

    #[error("component already started")]
    AlreadyStarted,

    #[error("component is closed")]
    Closed,

    #[error("unsupported caller DON: {0}")]
    UnsupportedCallerDon(u32),

    #[error("sender {0} is not a member of the expected DON")]
    SenderNotMember(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("response channel not found for workflow {0}")]
    ResponseChannelNotFound(String),

    /// The workflow is not draining its events; this one was dropped.
    #[error("response channel full for workflow {0}")]
    ResponseChannelFull(String),

    #[error("cancelled while waiting for DON")]
    DonWaitCancelled,

    #[error("operation cancelled")]
    Cancelled,

    /// The underlying capability returned an error.
    #[error("capability error: {0}")]
    Capability(String),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Transmission(#[from] TransmissionError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result alias for remote capability operations.
pub type Result<T> = std::result::Result<T, RemoteCapabilityError>;
