//! # Core Domain Entities
//!
//! Peer and DON identities plus the static description of a capability.

use crate::errors::PeerIdError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte peer identifier (the node's P2P public key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Create a peer ID from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random peer ID (tests and local simulations).
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// View as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = PeerIdError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 32] = value
            .try_into()
            .map_err(|_| PeerIdError::InvalidLength(value.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}..)", hex::encode(&self.0[..4]))
    }
}

/// A Decentralized Oracle Network: an ordered member set tolerating `f` faults.
///
/// `members.len() >= 2f + 1` is assumed by callers, not enforced. A smaller DON
/// is a valid state in which quorums simply never form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Don {
    pub id: u32,
    pub members: Vec<PeerId>,
    pub f: u8,
}

impl Don {
    #[must_use]
    pub fn new(id: u32, members: Vec<PeerId>, f: u8) -> Self {
        Self { id, members, f }
    }

    /// Number of members (N).
    #[must_use]
    pub fn n(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.members.contains(peer)
    }

    /// Position of `peer` in the member list.
    #[must_use]
    pub fn rank_of(&self, peer: &PeerId) -> Option<usize> {
        self.members.iter().position(|m| m == peer)
    }

    /// `F + 1`: enough agreeing submissions to include one honest member.
    #[must_use]
    pub fn f_plus_one(&self) -> u32 {
        u32::from(self.f) + 1
    }

    /// `2F + 1`: the certificate-style quorum.
    #[must_use]
    pub fn two_f_plus_one(&self) -> u32 {
        2 * u32::from(self.f) + 1
    }
}

/// Kind of capability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityType {
    #[default]
    Trigger,
    Action,
    Consensus,
    /// Writes to an external system; executions are staggered across the DON.
    Target,
}

/// Static description of a capability. Immutable after construction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    /// Versioned identifier, e.g. `write_chain@1.0.0`.
    pub id: String,
    pub capability_type: CapabilityType,
    pub description: String,
    /// The DON hosting the capability, when it is remote.
    pub don: Option<Don>,
}

impl CapabilityInfo {
    #[must_use]
    pub fn new(id: impl Into<String>, capability_type: CapabilityType, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability_type,
            description: description.into(),
            don: None,
        }
    }

    #[must_use]
    pub fn with_don(mut self, don: Don) -> Self {
        self.don = Some(don);
        self
    }
}
