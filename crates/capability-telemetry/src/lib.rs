//! # Capability Telemetry
//!
//! Structured logging for capability nodes, built on `tracing`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use capability_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! let _guard = init_telemetry(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CAPABILITY_SERVICE_NAME` | `capability-node` | Service name on every log line |
//! | `CAPABILITY_LOG_LEVEL` or `RUST_LOG` | `info` | Log level filter |
//! | `CAPABILITY_LOG_JSON` | `false` (`true` in containers) | JSON formatted logs |
//! | `CAPABILITY_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{build_filter, init_logging, LoggingGuard};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to install global subscriber: {0}")]
    SubscriberInit(String),
}

/// Initialize telemetry. Hold the guard for the lifetime of the process.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<LoggingGuard, TelemetryError> {
    logging::init_logging(config)
}

/// Span carrying the capability and DON a component serves.
///
/// ```rust,ignore
/// let _span = capability_span!("executable_server", capability_id = %id, don_id = don.id).entered();
/// ```
#[macro_export]
macro_rules! capability_span {
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}
