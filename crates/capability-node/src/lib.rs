//! # Capability Node
//!
//! A self-contained deployment of the remote capability protocol: a workflow
//! DON calling an echo target and subscribing to an interval trigger, both
//! hosted by a capability DON.
//!
//! - `config` - JSON node configuration
//! - `capabilities` - the local capabilities hosted by the capability DON
//! - `mesh` - node construction, startup, demo flow and shutdown

pub mod capabilities;
pub mod config;
pub mod mesh;

pub use config::{ConfigError, DonLayout, NodeConfig};
pub use mesh::CapabilityMesh;
