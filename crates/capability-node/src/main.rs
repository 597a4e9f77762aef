//! Capability node entry point.
//!
//! ```text
//! capability-node [config.json]
//! ```
//!
//! Logging is configured through `CAPABILITY_LOG_LEVEL`, `CAPABILITY_LOG_JSON`
//! and `RUST_LOG`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use capability_node::{CapabilityMesh, NodeConfig};
use capability_telemetry::{init_telemetry, TelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = init_telemetry(&TelemetryConfig::from_env())?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = NodeConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let shutdown = CancellationToken::new();
    let mesh = CapabilityMesh::build(config, &shutdown).await?;
    mesh.start()?;

    tokio::select! {
        result = mesh.run_demo() => match result {
            Ok(()) => info!("Demo complete"),
            Err(err) => error!(%err, "demo failed"),
        },
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    shutdown.cancel();
    mesh.shutdown().await;
    Ok(())
}
