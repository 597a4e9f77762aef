//! # Trigger Subscriber
//!
//! The workflow side of a remote trigger. Registers interest through a
//! `RegistrationClient`, collects the copies of each event sent by the
//! capability DON members, and delivers one aggregated event per workflow
//! once enough members agree.
//!
//! Each workflow's response channel is bounded. The receive path never waits
//! on it: when a channel is full the event is dropped with a warning.

use crate::config::RemoteTriggerConfig;
use crate::domain::{Aggregator, DefaultModeAggregator, MessageCache};
use crate::error::{RemoteCapabilityError, Result};
use crate::lifecycle::TaskGroup;
use crate::ports::{Dispatcher, Receiver, SystemTimeSource, TimeSource, TriggerCapability};
use crate::registration::RegistrationClient;
use async_trait::async_trait;
use capability_types::{
    sanitize_log_string, to_payload, CapabilityInfo, Don, MessageBody, Method, PeerId,
    TriggerRegistrationRequest, TriggerResponse,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Depth of each workflow's response channel.
pub const RESPONSE_CHANNEL_CAPACITY: usize = 1000;

/// Workflow ids accepted from a single trigger event message.
pub const MAX_WORKFLOW_IDS_PER_EVENT: usize = 1000;

/// One trigger occurrence as seen by one subscribing workflow.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TriggerEventKey {
    pub trigger_event_id: String,
    pub workflow_id: String,
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Default)]
struct SubscriberState {
    workflows: HashMap<String, mpsc::Sender<TriggerResponse>>,
    cache: MessageCache<TriggerEventKey, PeerId>,
}

struct SubscriberInner {
    config: RemoteTriggerConfig,
    info: CapabilityInfo,
    capability_don: Don,
    aggregator: Arc<dyn Aggregator>,
    min_responses: u32,
    time: Arc<dyn TimeSource>,
    state: Mutex<SubscriberState>,
}

impl SubscriberInner {
    fn handle_event(&self, msg: &MessageBody, sender: PeerId) -> Result<()> {
        if !self.capability_don.contains(&sender) {
            return Err(RemoteCapabilityError::SenderNotMember(sender.to_string()));
        }
        let metadata = msg.trigger_event_metadata.as_ref().ok_or_else(|| {
            RemoteCapabilityError::InvalidRequest("trigger event without metadata".into())
        })?;

        let mut workflow_ids = metadata.workflow_ids.as_slice();
        if workflow_ids.len() > MAX_WORKFLOW_IDS_PER_EVENT {
            warn!(
                capability_id = %self.info.id,
                received = workflow_ids.len(),
                max = MAX_WORKFLOW_IDS_PER_EVENT,
                "too many workflow ids in trigger event, truncating"
            );
            workflow_ids = &workflow_ids[..MAX_WORKFLOW_IDS_PER_EVENT];
        }

        let event_id = &metadata.trigger_event_id;
        for workflow_id in workflow_ids {
            if let Err(err) = self.handle_workflow_event(msg, sender, event_id, workflow_id) {
                if !matches!(err, RemoteCapabilityError::ResponseChannelNotFound(_)) {
                    warn!(
                        capability_id = %self.info.id,
                        workflow_id = %sanitize_log_string(workflow_id),
                        trigger_event_id = %sanitize_log_string(event_id),
                        %err,
                        "failed to deliver trigger event"
                    );
                }
            }
        }
        Ok(())
    }

    fn handle_workflow_event(
        &self,
        msg: &MessageBody,
        sender: PeerId,
        event_id: &str,
        workflow_id: &str,
    ) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.workflows.contains_key(workflow_id) {
            debug!(
                capability_id = %self.info.id,
                workflow_id = %sanitize_log_string(workflow_id),
                "event for unregistered workflow"
            );
            return Ok(());
        }

        let key = TriggerEventKey {
            trigger_event_id: event_id.to_string(),
            workflow_id: workflow_id.to_string(),
        };
        let now = self.time.now_ms();
        let created_at = state.cache.insert(key.clone(), sender, now, msg.payload.clone());
        if now.saturating_sub(created_at) > millis(self.config.registration_expiry) {
            warn!(
                capability_id = %self.info.id,
                trigger_event_id = %sanitize_log_string(event_id),
                "dropping stale trigger event"
            );
            return Ok(());
        }

        let (ready, payloads) = state.cache.ready(
            &key,
            self.min_responses,
            now.saturating_sub(millis(self.config.message_expiry)),
            false,
        );
        if !ready {
            return Ok(());
        }
        // disagreement leaves the key open for more copies
        let aggregated = self.aggregator.aggregate(event_id, &payloads)?;
        state.cache.consume(&key);

        let channel = state
            .workflows
            .get(workflow_id)
            .ok_or_else(|| RemoteCapabilityError::ResponseChannelNotFound(workflow_id.to_string()))?;
        match channel.try_send(aggregated) {
            Ok(()) => {
                info!(
                    capability_id = %self.info.id,
                    workflow_id = %sanitize_log_string(workflow_id),
                    trigger_event_id = %sanitize_log_string(event_id),
                    "delivered aggregated trigger event"
                );
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                Err(RemoteCapabilityError::ResponseChannelFull(workflow_id.to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(RemoteCapabilityError::ResponseChannelNotFound(workflow_id.to_string()))
            }
        }
    }

    fn expire_messages(&self) {
        let cutoff = self.time.now_ms().saturating_sub(millis(self.config.message_expiry));
        let dropped = self.state.lock().cache.delete_older_than(cutoff);
        if dropped > 0 {
            debug!(capability_id = %self.info.id, dropped, "expired trigger event messages");
        }
    }
}

/// A remote trigger as seen by one member of the subscribing DON.
pub struct TriggerSubscriber {
    inner: Arc<SubscriberInner>,
    registration: RegistrationClient,
    tasks: TaskGroup,
}

impl TriggerSubscriber {
    /// `info.don` must describe the capability DON. `aggregator` defaults to
    /// mode aggregation over `F + 1` identical events.
    pub fn new(
        mut config: RemoteTriggerConfig,
        info: CapabilityInfo,
        local_don: Don,
        dispatcher: Arc<dyn Dispatcher>,
        aggregator: Option<Arc<dyn Aggregator>>,
    ) -> Result<Self> {
        config.apply_defaults();
        let capability_don = info.don.clone().ok_or_else(|| {
            RemoteCapabilityError::InvalidRequest(format!("capability {} has no DON", info.id))
        })?;
        let aggregator: Arc<dyn Aggregator> = match aggregator {
            Some(aggregator) => aggregator,
            None => Arc::new(DefaultModeAggregator::new(capability_don.f_plus_one())),
        };
        let min_responses = if config.min_responses_to_aggregate == 0 {
            capability_don.f_plus_one()
        } else {
            config.min_responses_to_aggregate
        };

        let registration = RegistrationClient::new(
            dispatcher,
            info.id.clone(),
            local_don.id,
            capability_don.clone(),
            Method::RegisterTrigger,
            config.registration_refresh,
        );

        Ok(Self {
            inner: Arc::new(SubscriberInner {
                config,
                info,
                capability_don,
                aggregator,
                min_responses,
                time: Arc::new(SystemTimeSource),
                state: Mutex::new(SubscriberState::default()),
            }),
            registration,
            tasks: TaskGroup::new(),
        })
    }

    /// Replace the clock. Must be called before the subscriber is shared.
    #[must_use]
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.time = time;
        }
        self
    }

    pub fn start(&self) -> Result<()> {
        self.tasks.mark_started()?;
        self.registration.start()?;
        let inner = self.inner.clone();
        self.tasks
            .spawn_ticker("trigger_message_expiry", self.inner.config.message_expiry, move || {
                inner.expire_messages();
                std::future::ready(())
            });
        info!(capability_id = %self.inner.info.id, "trigger subscriber started");
        Ok(())
    }

    /// Stop all loops and close every workflow's response channel.
    pub async fn close(&self) {
        self.tasks.close().await;
        self.registration.close().await;
        self.inner.state.lock().workflows.clear();
        debug!(capability_id = %self.inner.info.id, "trigger subscriber closed");
    }
}

#[async_trait]
impl TriggerCapability for TriggerSubscriber {
    fn info(&self) -> CapabilityInfo {
        self.inner.info.clone()
    }

    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>> {
        let workflow_id = request.metadata.workflow_id.clone();
        if workflow_id.is_empty() {
            return Err(RemoteCapabilityError::InvalidRequest("empty workflow id".into()));
        }
        let payload = to_payload(&request)?;

        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        self.inner.state.lock().workflows.insert(workflow_id.clone(), tx);
        self.registration.register_workflow(&workflow_id, payload);
        Ok(rx)
    }

    async fn unregister_trigger(&self, request: TriggerRegistrationRequest) -> Result<()> {
        let workflow_id = &request.metadata.workflow_id;
        self.registration.unregister_workflow(workflow_id);
        self.inner.state.lock().workflows.remove(workflow_id);
        Ok(())
    }
}

#[async_trait]
impl Receiver for TriggerSubscriber {
    async fn receive(&self, msg: MessageBody) {
        if msg.method != Method::TriggerEvent {
            warn!(capability_id = %self.inner.info.id, method = %msg.method, "unexpected method");
            return;
        }
        let sender = match msg.sender_peer_id() {
            Ok(sender) => sender,
            Err(err) => {
                warn!(capability_id = %self.inner.info.id, %err, "dropping event with bad sender");
                return;
            }
        };
        if let Err(err) = self.inner.handle_event(&msg, sender) {
            warn!(
                capability_id = %self.inner.info.id,
                %sender,
                err = %sanitize_log_string(&err.to_string()),
                "dropping trigger event"
            );
        }
    }
}
