//! Server-side state of one deduplicated request.

use capability_types::{CapabilityRequest, ErrorCode, PeerId};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

/// The single outcome of a request, replayed to every requester.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CachedResponse {
    pub(crate) error: ErrorCode,
    pub(crate) error_msg: String,
    pub(crate) payload: Vec<u8>,
}

impl CachedResponse {
    pub(crate) fn timeout() -> Self {
        Self {
            error: ErrorCode::Timeout,
            error_msg: "request timed out before reaching quorum".into(),
            payload: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum Phase {
    Collecting,
    Executing,
    Responded(CachedResponse),
}

/// What the server should do after a requester was added.
#[derive(Debug, PartialEq)]
pub(crate) enum Admission {
    /// Quorum just formed; run the capability.
    Execute(CapabilityRequest),
    Wait,
    /// Already answered; reply to this requester right away.
    Reply(CachedResponse),
}

#[derive(Debug)]
pub(crate) struct ServerRequest {
    pub(crate) caller_don_id: u32,
    pub(crate) message_id: Vec<u8>,
    request: CapabilityRequest,
    required: u32,
    requesters: BTreeSet<PeerId>,
    answered: BTreeSet<PeerId>,
    phase: Phase,
    created_at: Instant,
}

impl ServerRequest {
    pub(crate) fn new(
        caller_don_id: u32,
        message_id: Vec<u8>,
        request: CapabilityRequest,
        required: u32,
    ) -> Self {
        Self {
            caller_don_id,
            message_id,
            request,
            required,
            requesters: BTreeSet::new(),
            answered: BTreeSet::new(),
            phase: Phase::Collecting,
            created_at: Instant::now(),
        }
    }

    pub(crate) fn add_requester(&mut self, peer: PeerId) -> Admission {
        self.requesters.insert(peer);
        if let Phase::Responded(cached) = &self.phase {
            if self.answered.insert(peer) {
                return Admission::Reply(cached.clone());
            }
            return Admission::Wait;
        }
        if self.is_collecting() && self.requesters.len() as u64 >= u64::from(self.required) {
            self.phase = Phase::Executing;
            return Admission::Execute(self.request.clone());
        }
        Admission::Wait
    }

    /// Record the outcome; returns the requesters still owed a reply.
    pub(crate) fn complete(&mut self, response: CachedResponse) -> Vec<PeerId> {
        if matches!(self.phase, Phase::Responded(_)) {
            return Vec::new();
        }
        self.phase = Phase::Responded(response);
        let pending: Vec<PeerId> = self.requesters.difference(&self.answered).copied().collect();
        self.answered.extend(pending.iter().copied());
        pending
    }

    pub(crate) fn is_expired(&self, timeout: Duration) -> bool {
        self.created_at.elapsed() >= timeout
    }

    pub(crate) fn is_collecting(&self) -> bool {
        matches!(self.phase, Phase::Collecting)
    }

    pub(crate) fn is_executing(&self) -> bool {
        matches!(self.phase, Phase::Executing)
    }

    #[cfg(test)]
    pub(crate) fn response(&self) -> Option<&CachedResponse> {
        match &self.phase {
            Phase::Responded(cached) => Some(cached),
            _ => None,
        }
    }
}
