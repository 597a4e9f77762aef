//! # Trigger Publisher
//!
//! Co-located with a local trigger. Remote registrations go through a
//! `RegistrationServer` whose target is the publisher itself; each admitted
//! registration gets an event task that forwards the trigger's events to every
//! member of the subscribing DON.
//!
//! With batching enabled, identical events (same caller DON, event id and
//! encoded bytes) for different workflows are coalesced and flushed on the
//! next batching tick as one message per `max_batch_size` workflow ids.

use crate::config::RemoteTriggerConfig;
use crate::error::{RemoteCapabilityError, Result};
use crate::lifecycle::TaskGroup;
use crate::ports::{Dispatcher, Receiver, RegistrationTarget, TriggerCapability};
use crate::registration::{RegistrationKey, RegistrationServer};
use async_trait::async_trait;
use capability_types::{
    from_payload, sanitize_log_string, to_payload, CapabilityInfo, Don, MessageBody, Method,
    PeerId, TriggerEventMetadata, TriggerRegistrationRequest, TriggerResponse,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One encoded event bound for several workflows of one caller DON.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BatchedResponse {
    raw: Vec<u8>,
    caller_don_id: u32,
    trigger_event_id: String,
    workflow_ids: Vec<String>,
}

fn batch_key(caller_don_id: u32, trigger_event_id: &str, raw: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(caller_don_id.to_le_bytes());
    hasher.update(trigger_event_id.as_bytes());
    hasher.update(raw);
    hasher.finalize().into()
}

struct PublisherInner {
    config: RemoteTriggerConfig,
    underlying: Arc<dyn TriggerCapability>,
    info: CapabilityInfo,
    local_don: Don,
    workflow_dons: HashMap<u32, Don>,
    dispatcher: Arc<dyn Dispatcher>,
    /// Stop handles of the per-registration event tasks.
    registrations: Mutex<HashMap<RegistrationKey, CancellationToken>>,
    batch: Mutex<HashMap<[u8; 32], BatchedResponse>>,
    tasks: TaskGroup,
}

impl PublisherInner {
    async fn forward_events(
        self: Arc<Self>,
        key: RegistrationKey,
        mut events: mpsc::Receiver<TriggerResponse>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.publish(&key, &event),
                    None => {
                        debug!(
                            capability_id = %self.info.id,
                            workflow_id = %sanitize_log_string(&key.workflow_id),
                            "trigger channel closed"
                        );
                        break;
                    }
                },
            }
        }
    }

    fn publish(&self, key: &RegistrationKey, event: &TriggerResponse) {
        let raw = match to_payload(event) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(capability_id = %self.info.id, %err, "failed to encode trigger event");
                return;
            }
        };

        if self.config.batching_enabled() {
            let hash = batch_key(key.caller_don_id, &event.event.id, &raw);
            self.batch
                .lock()
                .entry(hash)
                .or_insert_with(|| BatchedResponse {
                    raw,
                    caller_don_id: key.caller_don_id,
                    trigger_event_id: event.event.id.clone(),
                    workflow_ids: Vec::new(),
                })
                .workflow_ids
                .push(key.workflow_id.clone());
        } else {
            self.send_batch(&BatchedResponse {
                raw,
                caller_don_id: key.caller_don_id,
                trigger_event_id: event.event.id.clone(),
                workflow_ids: vec![key.workflow_id.clone()],
            });
        }
    }

    fn flush_batch(&self) {
        let pending: Vec<BatchedResponse> = self.batch.lock().drain().map(|(_, b)| b).collect();
        for batch in &pending {
            self.send_batch(batch);
        }
    }

    fn send_batch(&self, batch: &BatchedResponse) {
        let Some(caller_don) = self.workflow_dons.get(&batch.caller_don_id) else {
            warn!(
                capability_id = %self.info.id,
                caller_don_id = batch.caller_don_id,
                "no DON for caller, dropping trigger event"
            );
            return;
        };

        let chunk_size = (self.config.max_batch_size as usize).max(1);
        for workflow_ids in batch.workflow_ids.chunks(chunk_size) {
            for peer in &caller_don.members {
                let msg = MessageBody {
                    capability_id: self.info.id.clone(),
                    capability_don_id: self.local_don.id,
                    caller_don_id: batch.caller_don_id,
                    method: Method::TriggerEvent,
                    payload: batch.raw.clone(),
                    trigger_event_metadata: Some(TriggerEventMetadata {
                        workflow_ids: workflow_ids.to_vec(),
                        trigger_event_id: batch.trigger_event_id.clone(),
                    }),
                    ..Default::default()
                };
                if let Err(err) = self.dispatcher.send(*peer, msg) {
                    warn!(
                        capability_id = %self.info.id,
                        %peer,
                        trigger_event_id = %sanitize_log_string(&batch.trigger_event_id),
                        %err,
                        "failed to send trigger event"
                    );
                }
            }
        }
    }
}

/// Registration target that subscribes to the underlying trigger.
struct PublisherTarget {
    inner: Arc<PublisherInner>,
}

#[async_trait]
impl RegistrationTarget for PublisherTarget {
    async fn register(&self, key: &RegistrationKey, payload: &[u8]) -> Result<()> {
        let request: TriggerRegistrationRequest = from_payload(payload)?;
        let events = self.inner.underlying.register_trigger(request).await?;

        let cancel = self.inner.tasks.stop_token().child_token();
        if let Some(previous) = self
            .inner
            .registrations
            .lock()
            .insert(key.clone(), cancel.clone())
        {
            previous.cancel();
        }
        let inner = self.inner.clone();
        let key = key.clone();
        self.inner
            .tasks
            .spawn(async move { inner.forward_events(key, events, cancel).await });
        Ok(())
    }

    async fn unregister(&self, key: &RegistrationKey, payload: &[u8]) -> Result<()> {
        if let Some(cancel) = self.inner.registrations.lock().remove(key) {
            cancel.cancel();
        }
        let request: TriggerRegistrationRequest = from_payload(payload)?;
        self.inner.underlying.unregister_trigger(request).await
    }
}

/// Serves a local trigger to remote DONs.
pub struct TriggerPublisher {
    inner: Arc<PublisherInner>,
    registration: RegistrationServer,
}

impl TriggerPublisher {
    pub fn new(
        mut config: RemoteTriggerConfig,
        underlying: Arc<dyn TriggerCapability>,
        info: CapabilityInfo,
        local_don: Don,
        workflow_dons: HashMap<u32, Don>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        config.apply_defaults();
        let inner = Arc::new(PublisherInner {
            config,
            underlying,
            info,
            local_don,
            workflow_dons,
            dispatcher,
            registrations: Mutex::new(HashMap::new()),
            batch: Mutex::new(HashMap::new()),
            tasks: TaskGroup::new(),
        });
        let registration = RegistrationServer::new(
            inner.info.id.clone(),
            inner.workflow_dons.clone(),
            Arc::new(PublisherTarget {
                inner: inner.clone(),
            }),
            inner.config.registration_expiry,
        );
        Self {
            inner,
            registration,
        }
    }

    pub fn start(&self) -> Result<()> {
        self.inner.tasks.mark_started()?;
        self.registration.start()?;
        if self.inner.config.batching_enabled() {
            let inner = self.inner.clone();
            self.inner.tasks.spawn_ticker(
                "trigger_batching",
                self.inner.config.batch_collection_period,
                move || {
                    inner.flush_batch();
                    std::future::ready(())
                },
            );
        }
        info!(
            capability_id = %self.inner.info.id,
            batching = self.inner.config.batching_enabled(),
            "trigger publisher started"
        );
        Ok(())
    }

    pub async fn close(&self) {
        self.inner.tasks.close().await;
        self.registration.close().await;
        self.inner.registrations.lock().clear();
        debug!(capability_id = %self.inner.info.id, "trigger publisher closed");
    }

    /// Number of registrations with a running event task.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.inner.registrations.lock().len()
    }

    async fn handle_registration(&self, msg: &MessageBody, sender: PeerId) -> Result<()> {
        let request: TriggerRegistrationRequest = from_payload(&msg.payload)?;
        // one subscription per workflow and trigger, whatever step asked for it
        self.registration
            .register(msg, sender, &request.metadata.workflow_id, "")
            .await
    }
}

#[async_trait]
impl Receiver for TriggerPublisher {
    async fn receive(&self, msg: MessageBody) {
        let sender = match msg.sender_peer_id() {
            Ok(sender) => sender,
            Err(err) => {
                warn!(capability_id = %self.inner.info.id, %err, "dropping message with bad sender");
                return;
            }
        };

        let result = match msg.method {
            Method::RegisterTrigger => self.handle_registration(&msg, sender).await,
            other => Err(RemoteCapabilityError::UnsupportedMethod(other.to_string())),
        };
        if let Err(err) = result {
            warn!(
                capability_id = %self.inner.info.id,
                %sender,
                method = %msg.method,
                err = %sanitize_log_string(&err.to_string()),
                "dropping message"
            );
        }
    }
}
