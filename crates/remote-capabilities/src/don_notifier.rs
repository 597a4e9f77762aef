//! One-shot DON notifier.
//!
//! Callers block in `wait_for_don` until membership is known. The first
//! `notify_don_set` releases every waiter; later calls replace the stored
//! value for future waiters without signalling again.

use crate::error::{RemoteCapabilityError, Result};
use capability_types::Don;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct DonNotifier {
    don: watch::Sender<Option<Don>>,
}

impl Default for DonNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DonNotifier {
    #[must_use]
    pub fn new() -> Self {
        let (don, _) = watch::channel(None);
        Self { don }
    }

    pub fn notify_don_set(&self, don: Don) {
        self.don.send_replace(Some(don));
    }

    /// Wait until a DON was set, or fail once `cancel` fires.
    pub async fn wait_for_don(&self, cancel: &CancellationToken) -> Result<Don> {
        let mut rx = self.don.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(don) = current {
                return Ok(don);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(RemoteCapabilityError::DonWaitCancelled);
                    }
                }
                _ = cancel.cancelled() => return Err(RemoteCapabilityError::DonWaitCancelled),
            }
        }
    }
}
