//! Response collection for one in-flight client request.

use crate::error::{RemoteCapabilityError, Result};
use capability_types::{from_payload, CapabilityResponse, Don, ErrorCode, MessageBody, PeerId};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tokio::sync::oneshot;

/// Collects responses until `required` members agree on one outcome.
pub(crate) struct ClientRequest {
    capability_don: Don,
    required: u32,
    responded: HashSet<PeerId>,
    /// payload digest → count
    ok_votes: HashMap<[u8; 32], u32>,
    err_votes: HashMap<(ErrorCode, String), u32>,
    done: Option<oneshot::Sender<Result<CapabilityResponse>>>,
}

impl ClientRequest {
    pub(crate) fn new(
        capability_don: Don,
        done: oneshot::Sender<Result<CapabilityResponse>>,
    ) -> Self {
        let required = capability_don.f_plus_one();
        Self {
            capability_don,
            required,
            responded: HashSet::new(),
            ok_votes: HashMap::new(),
            err_votes: HashMap::new(),
            done: Some(done),
        }
    }

    /// True once an outcome was delivered or the caller stopped waiting.
    pub(crate) fn is_finished(&self) -> bool {
        self.done.as_ref().map_or(true, oneshot::Sender::is_closed)
    }

    /// Count one member's response. Non-members and repeat responders are
    /// ignored.
    pub(crate) fn on_response(&mut self, sender: PeerId, msg: &MessageBody) {
        if self.done.is_none()
            || !self.capability_don.contains(&sender)
            || !self.responded.insert(sender)
        {
            return;
        }

        let outcome = if msg.error == ErrorCode::Ok {
            let digest: [u8; 32] = Sha256::digest(&msg.payload).into();
            let votes = self.ok_votes.entry(digest).or_insert(0);
            *votes += 1;
            (*votes >= self.required)
                .then(|| from_payload::<CapabilityResponse>(&msg.payload).map_err(RemoteCapabilityError::from))
        } else {
            let votes = self
                .err_votes
                .entry((msg.error, msg.error_msg.clone()))
                .or_insert(0);
            *votes += 1;
            (*votes >= self.required).then(|| {
                Err(RemoteCapabilityError::RemoteExecutionFailed {
                    code: msg.error,
                    msg: msg.error_msg.clone(),
                })
            })
        };

        if let Some(outcome) = outcome {
            if let Some(done) = self.done.take() {
                let _ = done.send(outcome);
            }
        }
    }
}
