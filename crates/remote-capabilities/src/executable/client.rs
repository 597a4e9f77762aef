//! # Executable Client
//!
//! Runs on every member of the calling DON. `execute` sends the request to
//! the capability DON following the request's transmission schedule and
//! resolves once `F + 1` capability DON members returned the same outcome.

use super::client_request::ClientRequest;
use crate::config::RemoteExecutableConfig;
use crate::domain::{peer_delays, TransmissionConfig};
use crate::error::{RemoteCapabilityError, Result};
use crate::lifecycle::TaskGroup;
use crate::ports::{Dispatcher, ExecutableCapability, Receiver};
use crate::registration::RegistrationClient;
use async_trait::async_trait;
use capability_types::{
    sanitize_log_string, to_payload, validate_workflow_or_execution_id, CapabilityInfo,
    CapabilityRequest, CapabilityResponse, Don, MessageBody, Method, RegisterToWorkflowRequest,
    UnregisterFromWorkflowRequest,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Correlates requests with responses: one id per workflow execution.
fn message_id(execution_id: &str) -> String {
    format!("{}:{}", Method::Execute, execution_id)
}

struct ClientInner {
    info: CapabilityInfo,
    capability_don: Don,
    local_don: Don,
    dispatcher: Arc<dyn Dispatcher>,
    request_timeout: Duration,
    requests: Mutex<HashMap<String, ClientRequest>>,
}

impl ClientInner {
    /// Forget requests whose caller stopped waiting. Live requests are
    /// removed by `execute` itself, which owns their deadline.
    fn drop_abandoned(&self) {
        let mut requests = self.requests.lock();
        let before = requests.len();
        requests.retain(|_, req| !req.is_finished());
        let dropped = before - requests.len();
        if dropped > 0 {
            debug!(capability_id = %self.info.id, dropped, "dropped abandoned requests");
        }
    }

    fn send_request(&self, peer: capability_types::PeerId, message_id: &str, payload: &[u8]) {
        let msg = MessageBody {
            capability_id: self.info.id.clone(),
            capability_don_id: self.capability_don.id,
            caller_don_id: self.local_don.id,
            method: Method::Execute,
            message_id: message_id.as_bytes().to_vec(),
            payload: payload.to_vec(),
            ..Default::default()
        };
        if let Err(err) = self.dispatcher.send(peer, msg) {
            warn!(capability_id = %self.info.id, %peer, %err, "failed to send request");
        }
    }
}

/// A remote executable capability as seen from one calling DON member.
pub struct ExecutableClient {
    inner: Arc<ClientInner>,
    registration: RegistrationClient,
    tasks: TaskGroup,
}

impl ExecutableClient {
    /// `info.don` must describe the capability DON.
    pub fn new(
        mut config: RemoteExecutableConfig,
        info: CapabilityInfo,
        local_don: Don,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        config.apply_defaults();
        let capability_don = info.don.clone().ok_or_else(|| {
            RemoteCapabilityError::InvalidRequest(format!("capability {} has no DON", info.id))
        })?;

        let registration = RegistrationClient::new(
            dispatcher.clone(),
            info.id.clone(),
            local_don.id,
            capability_don.clone(),
            Method::RegisterToWorkflow,
            config.registration_refresh,
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                info,
                capability_don,
                local_don,
                dispatcher,
                request_timeout: config.request_timeout,
                requests: Mutex::new(HashMap::new()),
            }),
            registration,
            tasks: TaskGroup::new(),
        })
    }

    pub fn start(&self) -> Result<()> {
        self.tasks.mark_started()?;
        self.registration.start()?;
        let inner = self.inner.clone();
        self.tasks
            .spawn_ticker("abandoned_requests", self.inner.request_timeout, move || {
                inner.drop_abandoned();
                std::future::ready(())
            });
        info!(capability_id = %self.inner.info.id, "executable client started");
        Ok(())
    }

    pub async fn close(&self) {
        self.tasks.close().await;
        self.registration.close().await;
        debug!(capability_id = %self.inner.info.id, "executable client closed");
    }

    async fn execute_remote(
        &self,
        cancel: &CancellationToken,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse> {
        let execution_id = request.metadata.workflow_execution_id.clone();
        validate_workflow_or_execution_id(&execution_id)?;
        let message_id = message_id(&execution_id);
        let payload = to_payload(&request)?;
        let schedule = TransmissionConfig::from_request_config(&request.config)?;

        let mut plan: Vec<(Duration, capability_types::PeerId)> =
            peer_delays(&self.inner.capability_don.members, &execution_id, &schedule)
                .into_iter()
                .map(|(peer, delay)| (delay, peer))
                .collect();
        plan.sort();

        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut requests = self.inner.requests.lock();
            if requests.get(&message_id).is_some_and(|r| !r.is_finished()) {
                return Err(RemoteCapabilityError::DuplicateRequest(sanitize_log_string(&message_id)));
            }
            requests.insert(
                message_id.clone(),
                ClientRequest::new(self.inner.capability_don.clone(), done_tx),
            );
        }

        let started = Instant::now();
        let deadline = started + self.inner.request_timeout;
        let sends = async {
            for (delay, peer) in &plan {
                sleep_until(started + *delay).await;
                self.inner.send_request(*peer, &message_id, &payload);
            }
            std::future::pending::<()>().await;
        };
        let stop = self.tasks.stop_token();

        let outcome = tokio::select! {
            biased;
            outcome = done_rx => outcome.unwrap_or(Err(RemoteCapabilityError::Closed)),
            _ = cancel.cancelled() => Err(RemoteCapabilityError::ContextDoneBeforeResponseQuorum),
            _ = stop.cancelled() => Err(RemoteCapabilityError::Closed),
            _ = sleep_until(deadline) => Err(RemoteCapabilityError::RequestExpired),
            _ = sends => Err(RemoteCapabilityError::Closed),
        };

        self.inner.requests.lock().remove(&message_id);
        if let Err(err) = &outcome {
            debug!(
                capability_id = %self.inner.info.id,
                message_id = %sanitize_log_string(&message_id),
                %err,
                "remote execution did not succeed"
            );
        }
        outcome
    }
}

#[async_trait]
impl ExecutableCapability for ExecutableClient {
    fn info(&self) -> CapabilityInfo {
        self.inner.info.clone()
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse> {
        self.execute_remote(cancel, request).await
    }

    async fn register_to_workflow(&self, request: RegisterToWorkflowRequest) -> Result<()> {
        validate_workflow_or_execution_id(&request.metadata.workflow_id)?;
        let payload = to_payload(&request)?;
        self.registration
            .register_workflow(&request.metadata.workflow_id, payload);
        Ok(())
    }

    async fn unregister_from_workflow(&self, request: UnregisterFromWorkflowRequest) -> Result<()> {
        self.registration
            .unregister_workflow(&request.metadata.workflow_id);
        Ok(())
    }
}

#[async_trait]
impl Receiver for ExecutableClient {
    async fn receive(&self, msg: MessageBody) {
        if msg.method != Method::Execute {
            warn!(capability_id = %self.inner.info.id, method = %msg.method, "unexpected method");
            return;
        }
        let sender = match msg.sender_peer_id() {
            Ok(sender) => sender,
            Err(err) => {
                warn!(capability_id = %self.inner.info.id, %err, "dropping response with bad sender");
                return;
            }
        };
        let Ok(message_id) = std::str::from_utf8(&msg.message_id) else {
            warn!(capability_id = %self.inner.info.id, %sender, "dropping response with non-utf8 message id");
            return;
        };

        match self.inner.requests.lock().get_mut(message_id) {
            Some(request) => request.on_response(sender, &msg),
            None => debug!(
                capability_id = %self.inner.info.id,
                message_id = %sanitize_log_string(message_id),
                "response for unknown request"
            ),
        }
    }
}
