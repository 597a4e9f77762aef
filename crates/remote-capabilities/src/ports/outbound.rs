//! Outbound ports: what the protocol components drive.

use crate::error::Result;
use crate::registration::RegistrationKey;
use async_trait::async_trait;

pub use capability_transport::{Dispatcher, Receiver};

/// Side effect applied once a registration reaches quorum, and undone once
/// it expires.
#[async_trait]
pub trait RegistrationTarget: Send + Sync {
    async fn register(&self, key: &RegistrationKey, payload: &[u8]) -> Result<()>;

    async fn unregister(&self, key: &RegistrationKey, payload: &[u8]) -> Result<()>;
}

/// Clock used for cache timestamps and expiry decisions.
pub trait TimeSource: Send + Sync {
    /// Unix time in milliseconds.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}
