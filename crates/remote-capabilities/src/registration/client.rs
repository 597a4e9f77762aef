//! Registration client: periodically re-sends every live registration to
//! every member of the capability DON.

use crate::error::Result;
use crate::lifecycle::TaskGroup;
use capability_transport::Dispatcher;
use capability_types::{sanitize_log_string, Don, MessageBody, Method};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct ClientInner {
    dispatcher: Arc<dyn Dispatcher>,
    capability_id: String,
    caller_don_id: u32,
    capability_don: Don,
    method: Method,
    /// workflow id → encoded registration request
    registrations: Mutex<HashMap<String, Vec<u8>>>,
}

impl ClientInner {
    fn refresh(&self) {
        let snapshot: Vec<(String, Vec<u8>)> = self
            .registrations
            .lock()
            .iter()
            .map(|(id, payload)| (id.clone(), payload.clone()))
            .collect();

        for (workflow_id, payload) in snapshot {
            for peer in &self.capability_don.members {
                let msg = MessageBody {
                    capability_id: self.capability_id.clone(),
                    capability_don_id: self.capability_don.id,
                    caller_don_id: self.caller_don_id,
                    method: self.method,
                    payload: payload.clone(),
                    ..Default::default()
                };
                if let Err(err) = self.dispatcher.send(*peer, msg) {
                    warn!(
                        capability_id = %self.capability_id,
                        workflow_id = %sanitize_log_string(&workflow_id),
                        %peer,
                        %err,
                        "failed to send registration"
                    );
                }
            }
        }
    }
}

/// Sends registrations for the workflows of one caller DON member.
pub struct RegistrationClient {
    inner: Arc<ClientInner>,
    refresh: Duration,
    tasks: TaskGroup,
}

impl RegistrationClient {
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        capability_id: impl Into<String>,
        caller_don_id: u32,
        capability_don: Don,
        method: Method,
        refresh: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                dispatcher,
                capability_id: capability_id.into(),
                caller_don_id,
                capability_don,
                method,
                registrations: Mutex::new(HashMap::new()),
            }),
            refresh,
            tasks: TaskGroup::new(),
        }
    }

    pub fn start(&self) -> Result<()> {
        self.tasks.mark_started()?;
        let inner = self.inner.clone();
        self.tasks.spawn_ticker("registration_refresh", self.refresh, move || {
            inner.refresh();
            std::future::ready(())
        });
        info!(capability_id = %self.inner.capability_id, "registration client started");
        Ok(())
    }

    pub async fn close(&self) {
        self.tasks.close().await;
        debug!(capability_id = %self.inner.capability_id, "registration client closed");
    }

    /// Add or replace the registration sent for `workflow_id`.
    pub fn register_workflow(&self, workflow_id: &str, payload: Vec<u8>) {
        let previous = self
            .inner
            .registrations
            .lock()
            .insert(workflow_id.to_string(), payload);
        if previous.is_some() {
            warn!(
                capability_id = %self.inner.capability_id,
                workflow_id = %sanitize_log_string(workflow_id),
                "registration overwritten"
            );
        }
    }

    /// Stop refreshing `workflow_id`. The server expires it on its own.
    pub fn unregister_workflow(&self, workflow_id: &str) {
        self.inner.registrations.lock().remove(workflow_id);
    }

    #[must_use]
    pub fn is_registered(&self, workflow_id: &str) -> bool {
        self.inner.registrations.lock().contains_key(workflow_id)
    }
}
