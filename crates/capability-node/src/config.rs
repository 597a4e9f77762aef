//! # Node Configuration
//!
//! Loaded from an optional JSON file; every field has a default that runs a
//! four-member workflow DON against a four-member capability DON.
//!
//! ```json
//! {
//!   "workflow_don": { "id": 1, "members": 4, "f": 1 },
//!   "capability_don": { "id": 2, "members": 4, "f": 1 },
//!   "executable": { "registration_refresh": "1s", "request_timeout": "30s" },
//!   "trigger": { "registration_refresh": "1s", "batch_collection_period": "100ms" },
//!   "trigger_interval": "2s",
//!   "demo_timeout": "30s"
//! }
//! ```

use remote_capabilities::{RemoteExecutableConfig, RemoteTriggerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Shape of one simulated DON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonLayout {
    pub id: u32,
    pub members: usize,
    pub f: u8,
}

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub workflow_don: DonLayout,
    pub capability_don: DonLayout,
    pub executable: RemoteExecutableConfig,
    pub trigger: RemoteTriggerConfig,
    /// Period of the demo interval trigger.
    #[serde(with = "humantime_serde")]
    pub trigger_interval: Duration,
    /// Upper bound for each demo step.
    #[serde(with = "humantime_serde")]
    pub demo_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            workflow_don: DonLayout {
                id: 1,
                members: 4,
                f: 1,
            },
            capability_don: DonLayout {
                id: 2,
                members: 4,
                f: 1,
            },
            executable: RemoteExecutableConfig {
                registration_refresh: Duration::from_secs(1),
                request_timeout: Duration::from_secs(30),
                ..Default::default()
            },
            trigger: RemoteTriggerConfig {
                registration_refresh: Duration::from_secs(1),
                batch_collection_period: Duration::from_millis(100),
                ..Default::default()
            },
            trigger_interval: Duration::from_secs(2),
            demo_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("DON {id} has {members} members, at least {required} needed for f={f}")]
    DonTooSmall {
        id: u32,
        members: usize,
        f: u8,
        required: usize,
    },

    #[error("workflow and capability DONs share id {0}")]
    DuplicateDonId(u32),
}

impl NodeConfig {
    /// Read `path`, or use defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Both DONs must hold `2f + 1` members and have distinct ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for layout in [self.workflow_don, self.capability_don] {
            let required = 2 * usize::from(layout.f) + 1;
            if layout.members < required {
                return Err(ConfigError::DonTooSmall {
                    id: layout.id,
                    members: layout.members,
                    f: layout.f,
                    required,
                });
            }
        }
        if self.workflow_don.id == self.capability_don.id {
            return Err(ConfigError::DuplicateDonId(self.workflow_don.id));
        }
        Ok(())
    }
}
