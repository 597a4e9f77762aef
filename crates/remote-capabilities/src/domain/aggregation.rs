//! # Aggregation
//!
//! Turns the raw payloads received from many peers into one trusted value.
//! Requiring `F + 1` byte-identical payloads guarantees at least one honest
//! sender vouches for the winner, since at most `F` can collude.

use crate::error::{AggregationError, RemoteCapabilityError, Result};
use capability_types::{from_payload, TriggerResponse};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Pick the most common payload, provided it appears at least `min_matching`
/// times. Ties go to the payload with the smaller SHA-256 digest so every node
/// picks the same winner.
pub fn aggregate_mode_raw(
    payloads: &[Vec<u8>],
    min_matching: u32,
) -> std::result::Result<Vec<u8>, AggregationError> {
    let mut groups: HashMap<[u8; 32], (u32, &Vec<u8>)> = HashMap::new();
    for payload in payloads {
        let digest: [u8; 32] = Sha256::digest(payload).into();
        groups.entry(digest).or_insert((0, payload)).0 += 1;
    }

    let best = groups
        .iter()
        .max_by(|(da, (ca, _)), (db, (cb, _))| ca.cmp(cb).then_with(|| db.cmp(da)));

    match best {
        Some((_, (count, payload))) if *count >= min_matching => Ok((*payload).clone()),
        Some((_, (count, _))) => Err(AggregationError::InsufficientAgreement {
            found: *count,
            required: min_matching,
        }),
        None => Err(AggregationError::InsufficientAgreement {
            found: 0,
            required: min_matching,
        }),
    }
}

/// Combines the trigger events received from capability DON members.
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, trigger_event_id: &str, responses: &[Vec<u8>]) -> Result<TriggerResponse>;
}

/// Mode aggregation over the raw encoded responses.
#[derive(Debug, Clone, Copy)]
pub struct DefaultModeAggregator {
    min_identical_responses: u32,
}

impl DefaultModeAggregator {
    #[must_use]
    pub fn new(min_identical_responses: u32) -> Self {
        Self {
            min_identical_responses,
        }
    }
}

impl Aggregator for DefaultModeAggregator {
    fn aggregate(&self, _trigger_event_id: &str, responses: &[Vec<u8>]) -> Result<TriggerResponse> {
        let winner = aggregate_mode_raw(responses, self.min_identical_responses)?;
        from_payload(&winner).map_err(RemoteCapabilityError::from)
    }
}
