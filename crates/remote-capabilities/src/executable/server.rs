//! # Executable Server
//!
//! Runs on every member of the capability DON. Requests from the calling DON
//! are bucketed by `message_id + request hash`; once `F + 1` distinct members
//! of the calling DON asked for the same thing, the capability runs once and
//! the single outcome is sent to every requester.

use super::local::LocalExecutableCapability;
use super::server_request::{Admission, CachedResponse, ServerRequest};
use crate::config::RemoteExecutableConfig;
use crate::domain::request_hash;
use crate::error::{RemoteCapabilityError, Result};
use crate::lifecycle::TaskGroup;
use crate::ports::{Dispatcher, ExecutableCapability, Receiver, RegistrationTarget};
use crate::registration::{RegistrationKey, RegistrationServer};
use async_trait::async_trait;
use capability_types::{
    from_payload, sanitize_log_string, to_payload, validate_workflow_or_execution_id, CapabilityInfo,
    CapabilityRequest, CapabilityType, Don, ErrorCode, MessageBody, Method, PeerId,
    RegisterToWorkflowRequest, UnregisterFromWorkflowRequest,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Applies aggregated workflow registrations to the underlying capability.
struct TargetAdapter {
    underlying: Arc<dyn ExecutableCapability>,
}

#[async_trait]
impl RegistrationTarget for TargetAdapter {
    async fn register(&self, _key: &RegistrationKey, payload: &[u8]) -> Result<()> {
        let request: RegisterToWorkflowRequest = from_payload(payload)?;
        self.underlying.register_to_workflow(request).await
    }

    async fn unregister(&self, _key: &RegistrationKey, payload: &[u8]) -> Result<()> {
        let registered: RegisterToWorkflowRequest = from_payload(payload)?;
        self.underlying
            .unregister_from_workflow(UnregisterFromWorkflowRequest {
                metadata: registered.metadata,
                config: registered.config,
            })
            .await
    }
}

struct ServerInner {
    info: CapabilityInfo,
    local_don: Don,
    workflow_dons: HashMap<u32, Don>,
    dispatcher: Arc<dyn Dispatcher>,
    underlying: Arc<dyn ExecutableCapability>,
    config: RemoteExecutableConfig,
    requests: Mutex<HashMap<String, ServerRequest>>,
    parallel: Arc<Semaphore>,
    tasks: TaskGroup,
}

impl ServerInner {
    fn send_response(&self, peer: PeerId, caller_don_id: u32, message_id: &[u8], response: &CachedResponse) {
        let msg = MessageBody {
            capability_id: self.info.id.clone(),
            capability_don_id: self.local_don.id,
            caller_don_id,
            method: Method::Execute,
            message_id: message_id.to_vec(),
            payload: response.payload.clone(),
            error: response.error,
            error_msg: response.error_msg.clone(),
            ..Default::default()
        };
        if let Err(err) = self.dispatcher.send(peer, msg) {
            warn!(capability_id = %self.info.id, %peer, %err, "failed to send response");
        }
    }

    fn handle_execute(self: &Arc<Self>, msg: MessageBody, sender: PeerId) -> Result<()> {
        let caller_don = self
            .workflow_dons
            .get(&msg.caller_don_id)
            .ok_or(RemoteCapabilityError::UnsupportedCallerDon(msg.caller_don_id))?;
        if !caller_don.contains(&sender) {
            return Err(RemoteCapabilityError::SenderNotMember(sender.to_string()));
        }
        let message_id = String::from_utf8(msg.message_id.clone())
            .map_err(|_| RemoteCapabilityError::InvalidRequest("message id is not utf-8".into()))?;
        let request: CapabilityRequest = from_payload(&msg.payload)?;
        validate_workflow_or_execution_id(&request.metadata.workflow_execution_id)?;

        let hash = request_hash(&request, &self.config.request_hash_excluded_attributes)?;
        let request_id = format!("{message_id}{}", hex::encode(hash));

        let (admission, created) = {
            let mut requests = self.requests.lock();
            let created = !requests.contains_key(&request_id);
            let admission = requests
                .entry(request_id.clone())
                .or_insert_with(|| {
                    ServerRequest::new(
                        msg.caller_don_id,
                        msg.message_id.clone(),
                        request,
                        caller_don.f_plus_one(),
                    )
                })
                .add_requester(sender);
            (admission, created)
        };
        if created {
            self.schedule_expiry();
        }

        match admission {
            Admission::Wait => debug!(
                capability_id = %self.info.id,
                message_id = %sanitize_log_string(&message_id),
                %sender,
                "request recorded"
            ),
            Admission::Reply(cached) => {
                self.send_response(sender, msg.caller_don_id, &msg.message_id, &cached);
            }
            Admission::Execute(request) => {
                info!(
                    capability_id = %self.info.id,
                    message_id = %sanitize_log_string(&message_id),
                    "request reached quorum, executing"
                );
                let inner = self.clone();
                self.tasks.spawn(async move { inner.execute(request_id, request).await });
            }
        }
        Ok(())
    }

    async fn execute(self: Arc<Self>, request_id: String, request: CapabilityRequest) {
        let stop = self.tasks.stop_token();
        let _permit = tokio::select! {
            permit = self.parallel.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = stop.cancelled() => return,
        };

        let response = match self.underlying.execute(&stop, request).await {
            Ok(response) => match to_payload(&response) {
                Ok(payload) => CachedResponse {
                    error: ErrorCode::Ok,
                    error_msg: String::new(),
                    payload,
                },
                Err(err) => CachedResponse {
                    error: ErrorCode::InternalError,
                    error_msg: err.to_string(),
                    payload: Vec::new(),
                },
            },
            Err(err) => {
                error!(capability_id = %self.info.id, %err, "capability execution failed");
                CachedResponse {
                    error: ErrorCode::InternalError,
                    error_msg: sanitize_log_string(&err.to_string()),
                    payload: Vec::new(),
                }
            }
        };

        let recipients = {
            let mut requests = self.requests.lock();
            requests.get_mut(&request_id).map(|req| {
                (
                    req.complete(response.clone()),
                    req.caller_don_id,
                    req.message_id.clone(),
                )
            })
        };
        if let Some((peers, caller_don_id, message_id)) = recipients {
            for peer in peers {
                self.send_response(peer, caller_don_id, &message_id, &response);
            }
        }
    }

    /// Sweep once the request created just now reaches its deadline.
    fn schedule_expiry(self: &Arc<Self>) {
        let deadline = Instant::now() + self.config.server_request_timeout;
        let stop = self.tasks.stop_token();
        let inner = self.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = sleep_until(deadline) => inner.expire_requests(),
            }
        });
    }

    /// Answer unfinished requests past their deadline with `TIMEOUT` and
    /// forget answered ones.
    fn expire_requests(&self) {
        let timeout = self.config.server_request_timeout;
        let mut timed_out = Vec::new();
        {
            let mut requests = self.requests.lock();
            requests.retain(|_, req| {
                if !req.is_expired(timeout) || req.is_executing() {
                    return true;
                }
                if req.is_collecting() {
                    let peers = req.complete(CachedResponse::timeout());
                    timed_out.push((peers, req.caller_don_id, req.message_id.clone()));
                }
                false
            });
        }

        let timeout_response = CachedResponse::timeout();
        for (peers, caller_don_id, message_id) in timed_out {
            warn!(
                capability_id = %self.info.id,
                message_id = %sanitize_log_string(&String::from_utf8_lossy(&message_id)),
                requesters = peers.len(),
                "request expired before quorum"
            );
            for peer in peers {
                self.send_response(peer, caller_don_id, &message_id, &timeout_response);
            }
        }
    }
}

/// Hosts one executable capability for remote callers.
pub struct ExecutableServer {
    inner: Arc<ServerInner>,
    registration: RegistrationServer,
}

impl ExecutableServer {
    /// `underlying` of type `Target` is wrapped so members take turns
    /// according to each request's transmission schedule.
    pub fn new(
        peer_id: PeerId,
        mut config: RemoteExecutableConfig,
        underlying: Arc<dyn ExecutableCapability>,
        info: CapabilityInfo,
        local_don: Don,
        workflow_dons: HashMap<u32, Don>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        config.apply_defaults();
        if local_don.rank_of(&peer_id).is_none() {
            warn!(
                capability_id = %info.id,
                %peer_id,
                don_id = local_don.id,
                "host is not a member of its DON, transmission schedules give it no slot"
            );
        }
        let underlying: Arc<dyn ExecutableCapability> = if info.capability_type == CapabilityType::Target {
            Arc::new(LocalExecutableCapability::new(underlying, peer_id, local_don.clone()))
        } else {
            underlying
        };

        let registration = RegistrationServer::new(
            info.id.clone(),
            workflow_dons.clone(),
            Arc::new(TargetAdapter {
                underlying: underlying.clone(),
            }),
            config.registration_expiry,
        );
        let parallel = Arc::new(Semaphore::new(config.server_max_parallel_requests as usize));

        Self {
            inner: Arc::new(ServerInner {
                info,
                local_don,
                workflow_dons,
                dispatcher,
                underlying,
                config,
                requests: Mutex::new(HashMap::new()),
                parallel,
                tasks: TaskGroup::new(),
            }),
            registration,
        }
    }

    pub fn start(&self) -> Result<()> {
        self.inner.tasks.mark_started()?;
        self.registration.start()?;
        let inner = self.inner.clone();
        self.inner
            .tasks
            .spawn_ticker("request_expiry", self.inner.config.expiry_check_interval(), move || {
                inner.expire_requests();
                std::future::ready(())
            });
        info!(capability_id = %self.inner.info.id, "executable server started");
        Ok(())
    }

    pub async fn close(&self) {
        self.inner.tasks.close().await;
        self.registration.close().await;
        debug!(capability_id = %self.inner.info.id, "executable server closed");
    }

    async fn handle_registration(&self, msg: &MessageBody, sender: PeerId) -> Result<()> {
        let request: RegisterToWorkflowRequest = from_payload(&msg.payload)?;
        self.registration
            .register(
                msg,
                sender,
                &request.metadata.workflow_id,
                &request.metadata.reference_id,
            )
            .await
    }
}

#[async_trait]
impl Receiver for ExecutableServer {
    async fn receive(&self, msg: MessageBody) {
        let sender = match msg.sender_peer_id() {
            Ok(sender) => sender,
            Err(err) => {
                warn!(capability_id = %self.inner.info.id, %err, "dropping message with bad sender");
                return;
            }
        };
        let method = msg.method;

        let result = match method {
            Method::Execute => self.inner.handle_execute(msg, sender),
            Method::RegisterToWorkflow => self.handle_registration(&msg, sender).await,
            Method::UnregisterFromWorkflow => {
                debug!(
                    capability_id = %self.inner.info.id,
                    %sender,
                    "ignoring explicit unregister, registrations expire instead"
                );
                Ok(())
            }
            other => Err(RemoteCapabilityError::UnsupportedMethod(other.to_string())),
        };

        if let Err(err) = result {
            warn!(
                capability_id = %self.inner.info.id,
                %sender,
                %method,
                err = %sanitize_log_string(&err.to_string()),
                "dropping message"
            );
        }
    }
}
