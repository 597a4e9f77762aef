//! # Transmission Schedules
//!
//! Decide when each DON member acts on a request. `allAtOnce` sends to every
//! member immediately; `oneAtATime` staggers members by `deltaStage` in a
//! pseudo-random order derived from the transmission id, so every node
//! computes the same order without coordination.

use crate::error::TransmissionError;
use capability_types::PeerId;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

pub const SCHEDULE_KEY: &str = "schedule";
pub const DELTA_STAGE_KEY: &str = "deltaStage";
pub const SCHEDULE_ALL_AT_ONCE: &str = "allAtOnce";
pub const SCHEDULE_ONE_AT_A_TIME: &str = "oneAtATime";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Schedule {
    #[default]
    AllAtOnce,
    OneAtATime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmissionConfig {
    pub schedule: Schedule,
    pub delta_stage: Duration,
}

impl TransmissionConfig {
    /// Read the schedule from a request's `config` object.
    ///
    /// A missing config or missing `schedule` key means `allAtOnce`.
    pub fn from_request_config(config: &Value) -> Result<Self, TransmissionError> {
        let map = match config {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            _ => return Err(TransmissionError::MalformedConfig),
        };

        let schedule = match map.get(SCHEDULE_KEY) {
            None | Some(Value::Null) => Schedule::AllAtOnce,
            Some(Value::String(s)) if s == SCHEDULE_ALL_AT_ONCE => Schedule::AllAtOnce,
            Some(Value::String(s)) if s == SCHEDULE_ONE_AT_A_TIME => Schedule::OneAtATime,
            Some(other) => {
                return Err(TransmissionError::UnknownSchedule(
                    other.as_str().map_or_else(|| other.to_string(), str::to_string),
                ))
            }
        };

        let delta_stage = match map.get(DELTA_STAGE_KEY) {
            None | Some(Value::Null) => Duration::ZERO,
            Some(Value::String(s)) => {
                humantime::parse_duration(s).map_err(|e| TransmissionError::InvalidDeltaStage {
                    value: s.clone(),
                    reason: e.to_string(),
                })?
            }
            Some(other) => {
                return Err(TransmissionError::InvalidDeltaStage {
                    value: other.to_string(),
                    reason: "expected a duration string".into(),
                })
            }
        };

        Ok(Self {
            schedule,
            delta_stage,
        })
    }
}

/// Position of every member index in the shuffled order.
fn permuted_positions(member_count: usize, transmission_id: &str) -> Vec<usize> {
    let mut order: Vec<(usize, [u8; 32])> = (0..member_count)
        .map(|i| {
            let mut hasher = Sha256::new();
            hasher.update(transmission_id.as_bytes());
            hasher.update((i as u64).to_be_bytes());
            (i, hasher.finalize().into())
        })
        .collect();
    order.sort_by(|a, b| a.1.cmp(&b.1));

    let mut positions = vec![0; member_count];
    for (position, (index, _)) in order.into_iter().enumerate() {
        positions[index] = position;
    }
    positions
}

/// Delay before each member should be contacted.
#[must_use]
pub fn peer_delays(
    members: &[PeerId],
    transmission_id: &str,
    config: &TransmissionConfig,
) -> HashMap<PeerId, Duration> {
    let positions = permuted_positions(members.len(), transmission_id);
    members
        .iter()
        .zip(positions)
        .map(|(peer, position)| {
            let delay = match config.schedule {
                Schedule::AllAtOnce => Duration::ZERO,
                Schedule::OneAtATime => {
                    config.delta_stage * u32::try_from(position).unwrap_or(u32::MAX)
                }
            };
            (*peer, delay)
        })
        .collect()
}

/// Delay for a single member, `None` when `peer` is not in `members`.
#[must_use]
pub fn delay_for(
    peer: &PeerId,
    members: &[PeerId],
    transmission_id: &str,
    config: &TransmissionConfig,
) -> Option<Duration> {
    peer_delays(members, transmission_id, config).get(peer).copied()
}
