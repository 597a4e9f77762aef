//! Local capabilities hosted by the capability DON.

use async_trait::async_trait;
use capability_types::{
    CapabilityInfo, CapabilityRequest, CapabilityResponse, CapabilityType, RegisterToWorkflowRequest,
    TriggerEvent, TriggerRegistrationRequest, TriggerResponse, UnregisterFromWorkflowRequest,
};
use parking_lot::Mutex;
use remote_capabilities::{ExecutableCapability, RemoteCapabilityError, Result, TriggerCapability};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const ECHO_TARGET_ID: &str = "echo-target@1.0.0";
pub const INTERVAL_TRIGGER_ID: &str = "interval-trigger@1.0.0";

const TRIGGER_CHANNEL_CAPACITY: usize = 16;

/// A target that answers with its own inputs.
#[derive(Debug, Default)]
pub struct EchoTarget;

#[async_trait]
impl ExecutableCapability for EchoTarget {
    fn info(&self) -> CapabilityInfo {
        CapabilityInfo::new(ECHO_TARGET_ID, CapabilityType::Target, "Echoes request inputs")
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse> {
        if cancel.is_cancelled() {
            return Err(RemoteCapabilityError::Cancelled);
        }
        debug!(
            execution_id = %request.metadata.workflow_execution_id,
            "echo target executing"
        );
        Ok(CapabilityResponse {
            value: request.inputs,
        })
    }

    async fn register_to_workflow(&self, request: RegisterToWorkflowRequest) -> Result<()> {
        info!(workflow_id = %request.metadata.workflow_id, "echo target registered to workflow");
        Ok(())
    }

    async fn unregister_from_workflow(&self, request: UnregisterFromWorkflowRequest) -> Result<()> {
        info!(workflow_id = %request.metadata.workflow_id, "echo target unregistered from workflow");
        Ok(())
    }
}

/// Emits a numbered event every `period` for each registration.
///
/// Tick `n` of a trigger has the same id and outputs on every node, so the
/// subscribers can aggregate copies from different members.
pub struct IntervalTrigger {
    period: Duration,
    registrations: Mutex<HashMap<String, CancellationToken>>,
}

impl IntervalTrigger {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            registrations: Mutex::new(HashMap::new()),
        }
    }

    fn registration_key(request: &TriggerRegistrationRequest) -> String {
        format!("{}/{}", request.metadata.workflow_id, request.trigger_id)
    }

    /// Stop every registration's event task.
    pub fn stop_all(&self) {
        for (_, token) in self.registrations.lock().drain() {
            token.cancel();
        }
    }
}

impl Drop for IntervalTrigger {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[async_trait]
impl TriggerCapability for IntervalTrigger {
    fn info(&self) -> CapabilityInfo {
        CapabilityInfo::new(INTERVAL_TRIGGER_ID, CapabilityType::Trigger, "Fires on a fixed period")
    }

    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>> {
        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let stop = CancellationToken::new();
        if let Some(previous) = self
            .registrations
            .lock()
            .insert(Self::registration_key(&request), stop.clone())
        {
            previous.cancel();
        }

        let period = self.period;
        let trigger_id = request.trigger_id.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        tick += 1;
                        let response = TriggerResponse {
                            event: TriggerEvent {
                                trigger_type: INTERVAL_TRIGGER_ID.to_string(),
                                id: format!("{trigger_id}-{tick}"),
                                outputs: json!({ "tick": tick }),
                            },
                            err: None,
                        };
                        if tx.send(response).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn unregister_trigger(&self, request: TriggerRegistrationRequest) -> Result<()> {
        if let Some(token) = self
            .registrations
            .lock()
            .remove(&Self::registration_key(&request))
        {
            token.cancel();
        }
        Ok(())
    }
}
