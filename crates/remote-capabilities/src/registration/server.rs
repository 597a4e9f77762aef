//! Registration server: admits a registration once `2F + 1` members of the
//! caller DON agree on it, and tears it down once they stop refreshing.

use super::RegistrationKey;
use crate::domain::{aggregate_mode_raw, MessageCache};
use crate::error::{RemoteCapabilityError, Result};
use crate::lifecycle::TaskGroup;
use crate::ports::{RegistrationTarget, SystemTimeSource, TimeSource};
use capability_types::{sanitize_log_string, validate_workflow_or_execution_id, Don, MessageBody, PeerId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct ServerState {
    /// Registrations that reached quorum, with their aggregated payload.
    active: HashMap<RegistrationKey, Vec<u8>>,
    cache: MessageCache<RegistrationKey, PeerId>,
}

struct ServerInner {
    capability_id: String,
    workflow_dons: HashMap<u32, Don>,
    target: Arc<dyn RegistrationTarget>,
    registration_expiry: Duration,
    time: Arc<dyn TimeSource>,
    /// Held across `target` calls so a key is registered at most once.
    state: Mutex<ServerState>,
}

impl ServerInner {
    fn expiry_ms(&self) -> i64 {
        i64::try_from(self.registration_expiry.as_millis()).unwrap_or(i64::MAX)
    }

    async fn expire_registrations(&self, stop: &CancellationToken) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = self.time.now_ms();
        let fresh_since = now.saturating_sub(self.expiry_ms());

        let mut expired = Vec::new();
        for key in state.active.keys() {
            let still_fresh = self.workflow_dons.get(&key.caller_don_id).is_some_and(|don| {
                state
                    .cache
                    .ready(key, don.two_f_plus_one(), fresh_since, false)
                    .0
            });
            if !still_fresh {
                expired.push(key.clone());
            }
        }

        for key in expired {
            if let Some(payload) = state.active.remove(&key) {
                info!(
                    capability_id = %self.capability_id,
                    workflow_id = %sanitize_log_string(&key.workflow_id),
                    caller_don_id = key.caller_don_id,
                    "registration expired, unregistering"
                );
                let result = tokio::select! {
                    result = self.target.unregister(&key, &payload) => result,
                    _ = stop.cancelled() => {
                        warn!(
                            capability_id = %self.capability_id,
                            workflow_id = %sanitize_log_string(&key.workflow_id),
                            "shutting down, unregister abandoned"
                        );
                        return;
                    }
                };
                if let Err(err) = result {
                    error!(
                        capability_id = %self.capability_id,
                        workflow_id = %sanitize_log_string(&key.workflow_id),
                        %err,
                        "failed to unregister"
                    );
                }
            }
            state.cache.delete(&key);
        }

        let dropped = state.cache.delete_inactive_since(fresh_since);
        if dropped > 0 {
            debug!(capability_id = %self.capability_id, dropped, "dropped stale registration attempts");
        }
    }
}

/// Quorum-gated registration admission for one capability.
pub struct RegistrationServer {
    inner: Arc<ServerInner>,
    tasks: TaskGroup,
}

impl RegistrationServer {
    pub fn new(
        capability_id: impl Into<String>,
        workflow_dons: HashMap<u32, Don>,
        target: Arc<dyn RegistrationTarget>,
        registration_expiry: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                capability_id: capability_id.into(),
                workflow_dons,
                target,
                registration_expiry,
                time: Arc::new(SystemTimeSource),
                state: Mutex::new(ServerState::default()),
            }),
            tasks: TaskGroup::new(),
        }
    }

    /// Replace the clock. Must be called before the server is shared.
    #[must_use]
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.time = time;
        }
        self
    }

    pub fn start(&self) -> Result<()> {
        self.tasks.mark_started()?;
        let inner = self.inner.clone();
        let stop = self.tasks.stop_token();
        self.tasks.spawn_ticker("registration_expiry", self.inner.registration_expiry, move || {
            let inner = inner.clone();
            let stop = stop.clone();
            async move { inner.expire_registrations(&stop).await }
        });
        info!(capability_id = %self.inner.capability_id, "registration server started");
        Ok(())
    }

    pub async fn close(&self) {
        self.tasks.close().await;
        debug!(capability_id = %self.inner.capability_id, "registration server closed");
    }

    /// Record one member's registration and register with the target once
    /// quorum is reached.
    pub async fn register(
        &self,
        msg: &MessageBody,
        sender: PeerId,
        workflow_id: &str,
        step_reference: &str,
    ) -> Result<()> {
        let inner = &self.inner;
        let caller_don = inner
            .workflow_dons
            .get(&msg.caller_don_id)
            .ok_or(RemoteCapabilityError::UnsupportedCallerDon(msg.caller_don_id))?;
        if !caller_don.contains(&sender) {
            return Err(RemoteCapabilityError::SenderNotMember(sender.to_string()));
        }
        validate_workflow_or_execution_id(workflow_id)?;

        let key = RegistrationKey::new(msg.caller_don_id, workflow_id, step_reference);
        let mut state = inner.state.lock().await;
        let now = inner.time.now_ms();
        state.cache.insert(key.clone(), sender, now, msg.payload.clone());

        if state.active.contains_key(&key) {
            debug!(
                capability_id = %inner.capability_id,
                workflow_id = %sanitize_log_string(workflow_id),
                "registration refreshed"
            );
            return Ok(());
        }

        let (ready, payloads) = state.cache.ready(
            &key,
            caller_don.two_f_plus_one(),
            now.saturating_sub(inner.expiry_ms()),
            false,
        );
        if !ready {
            debug!(
                capability_id = %inner.capability_id,
                workflow_id = %sanitize_log_string(workflow_id),
                "waiting for registration quorum"
            );
            return Ok(());
        }

        let aggregated = match aggregate_mode_raw(&payloads, caller_don.f_plus_one()) {
            Ok(aggregated) => aggregated,
            Err(err) => {
                // more submissions may still settle the disagreement
                warn!(
                    capability_id = %inner.capability_id,
                    workflow_id = %sanitize_log_string(workflow_id),
                    %err,
                    "registration payloads disagree"
                );
                return Ok(());
            }
        };

        inner.target.register(&key, &aggregated).await?;
        state.active.insert(key, aggregated);
        info!(
            capability_id = %inner.capability_id,
            workflow_id = %sanitize_log_string(workflow_id),
            caller_don_id = msg.caller_don_id,
            "registration reached quorum"
        );
        Ok(())
    }

    /// Number of registrations currently active.
    pub async fn active_registrations(&self) -> usize {
        self.inner.state.lock().await.active.len()
    }

    /// Run one expiry sweep now.
    pub async fn expire_registrations(&self) {
        self.inner.expire_registrations(&self.tasks.stop_token()).await;
    }
}
