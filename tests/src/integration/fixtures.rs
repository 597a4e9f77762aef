//! Shared builders for multi-node tests.

use async_trait::async_trait;
use capability_transport::{InMemoryBroker, NodeDispatcher};
use capability_types::{
    CapabilityInfo, CapabilityRequest, CapabilityResponse, CapabilityType, Don, PeerId,
    RegisterToWorkflowRequest, RequestMetadata, TriggerRegistrationRequest, TriggerResponse,
    UnregisterFromWorkflowRequest,
};
use parking_lot::Mutex;
use remote_capabilities::{
    ExecutableCapability, ExecutableClient, ExecutableServer, RemoteCapabilityError,
    RemoteExecutableConfig, RemoteTriggerConfig, Result, TriggerCapability, TriggerPublisher,
    TriggerSubscriber,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const WORKFLOW_DON_ID: u32 = 1;
pub const CAPABILITY_DON_ID: u32 = 2;
pub const EXECUTABLE_ID: &str = "write_chain@1.0.0";
pub const TRIGGER_ID: &str = "cron-trigger@1.0.0";

pub const WORKFLOW_A: &str = "15c631d295ef5e32deb99a10ee6804bc4af13855687559d7ff6552ac6dbb2ce0";
pub const WORKFLOW_B: &str = "25c631d295ef5e32deb99a10ee6804bc4af13855687559d7ff6552ac6dbb2ce1";
pub const EXECUTION_ID: &str = "95ef5e32deb99a10ee6804bc4af1385568755915c631d2d7ff6552ac6dbb2ce0";

/// A DON of `n` random members.
pub fn don(id: u32, n: usize, f: u8) -> Don {
    Don::new(id, (0..n).map(|_| PeerId::random()).collect(), f)
}

pub fn executable_info(capability_don: &Don) -> CapabilityInfo {
    CapabilityInfo::new(EXECUTABLE_ID, CapabilityType::Action, "test action")
        .with_don(capability_don.clone())
}

pub fn trigger_info(capability_don: &Don) -> CapabilityInfo {
    CapabilityInfo::new(TRIGGER_ID, CapabilityType::Trigger, "test trigger")
        .with_don(capability_don.clone())
}

pub fn request(inputs: Value) -> CapabilityRequest {
    CapabilityRequest {
        metadata: RequestMetadata {
            workflow_id: WORKFLOW_A.to_string(),
            workflow_execution_id: EXECUTION_ID.to_string(),
            reference_id: "step-1".to_string(),
            ..Default::default()
        },
        config: Value::Null,
        inputs,
    }
}

pub fn trigger_registration(workflow_id: &str) -> TriggerRegistrationRequest {
    TriggerRegistrationRequest {
        trigger_id: "every-minute".to_string(),
        metadata: RequestMetadata {
            workflow_id: workflow_id.to_string(),
            reference_id: "trigger".to_string(),
            ..Default::default()
        },
        config: json!({"schedule": "* * * * *"}),
    }
}

/// Quick settings so registration and batching happen within milliseconds.
pub fn fast_trigger_config() -> RemoteTriggerConfig {
    RemoteTriggerConfig {
        registration_refresh: Duration::from_millis(20),
        registration_expiry: Duration::from_secs(10),
        batch_collection_period: Duration::from_millis(20),
        ..Default::default()
    }
}

pub fn executable_config(request_timeout: Duration) -> RemoteExecutableConfig {
    RemoteExecutableConfig {
        registration_refresh: Duration::from_millis(20),
        registration_expiry: Duration::from_secs(10),
        request_timeout,
        ..Default::default()
    }
}

/// Broker plus one dispatcher per peer, created on first use.
pub struct TestNetwork {
    pub broker: InMemoryBroker,
    nodes: Mutex<HashMap<PeerId, Arc<NodeDispatcher>>>,
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl TestNetwork {
    pub fn new() -> Self {
        Self {
            broker: InMemoryBroker::new(),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn node(&self, peer: PeerId) -> Arc<NodeDispatcher> {
        self.nodes
            .lock()
            .entry(peer)
            .or_insert_with(|| self.broker.register_node(peer))
            .clone()
    }

    pub fn start(&self) {
        self.broker.start();
    }
}

/// Start one `ExecutableServer` per capability DON member. `capability`
/// picks each member's underlying capability by index.
pub fn start_servers(
    network: &TestNetwork,
    config: &RemoteExecutableConfig,
    capability_don: &Don,
    workflow_don: &Don,
    capability: impl Fn(usize) -> Arc<dyn ExecutableCapability>,
) -> Vec<Arc<ExecutableServer>> {
    let workflow_dons = HashMap::from([(workflow_don.id, workflow_don.clone())]);
    capability_don
        .members
        .iter()
        .enumerate()
        .map(|(i, &peer)| {
            let dispatcher = network.node(peer);
            let server = Arc::new(ExecutableServer::new(
                peer,
                config.clone(),
                capability(i),
                executable_info(capability_don),
                capability_don.clone(),
                workflow_dons.clone(),
                dispatcher.clone(),
            ));
            dispatcher
                .set_receiver(EXECUTABLE_ID, capability_don.id, server.clone())
                .unwrap();
            server.start().unwrap();
            server
        })
        .collect()
}

/// Start one `ExecutableClient` per member of `workflow_don`. `client_view`
/// is the capability DON as the clients believe it to be.
pub fn start_clients(
    network: &TestNetwork,
    config: &RemoteExecutableConfig,
    client_view: &Don,
    workflow_don: &Don,
) -> Vec<Arc<ExecutableClient>> {
    workflow_don
        .members
        .iter()
        .map(|&peer| {
            let dispatcher = network.node(peer);
            let client = Arc::new(
                ExecutableClient::new(
                    config.clone(),
                    executable_info(client_view),
                    workflow_don.clone(),
                    dispatcher.clone(),
                )
                .unwrap(),
            );
            dispatcher
                .set_receiver(EXECUTABLE_ID, client_view.id, client.clone())
                .unwrap();
            client.start().unwrap();
            client
        })
        .collect()
}

/// Run `request` on every client concurrently.
pub async fn execute_all(
    clients: &[Arc<ExecutableClient>],
    request: CapabilityRequest,
) -> Vec<Result<CapabilityResponse>> {
    let mut calls = JoinSet::new();
    for client in clients {
        let client = client.clone();
        let request = request.clone();
        calls.spawn(async move { client.execute(&CancellationToken::new(), request).await });
    }
    let mut results = Vec::new();
    while let Some(result) = calls.join_next().await {
        results.push(result.unwrap());
    }
    results
}

pub fn start_publishers(
    network: &TestNetwork,
    config: &RemoteTriggerConfig,
    capability_don: &Don,
    workflow_don: &Don,
    trigger: impl Fn(usize) -> Arc<dyn TriggerCapability>,
) -> Vec<Arc<TriggerPublisher>> {
    let workflow_dons = HashMap::from([(workflow_don.id, workflow_don.clone())]);
    capability_don
        .members
        .iter()
        .enumerate()
        .map(|(i, &peer)| {
            let dispatcher = network.node(peer);
            let publisher = Arc::new(TriggerPublisher::new(
                config.clone(),
                trigger(i),
                trigger_info(capability_don),
                capability_don.clone(),
                workflow_dons.clone(),
                dispatcher.clone(),
            ));
            dispatcher
                .set_receiver(TRIGGER_ID, capability_don.id, publisher.clone())
                .unwrap();
            publisher.start().unwrap();
            publisher
        })
        .collect()
}

pub fn start_subscribers(
    network: &TestNetwork,
    config: &RemoteTriggerConfig,
    capability_don: &Don,
    workflow_don: &Don,
) -> Vec<Arc<TriggerSubscriber>> {
    workflow_don
        .members
        .iter()
        .map(|&peer| {
            let dispatcher = network.node(peer);
            let subscriber = Arc::new(
                TriggerSubscriber::new(
                    config.clone(),
                    trigger_info(capability_don),
                    workflow_don.clone(),
                    dispatcher.clone(),
                    None,
                )
                .unwrap(),
            );
            dispatcher
                .set_receiver(TRIGGER_ID, capability_don.id, subscriber.clone())
                .unwrap();
            subscriber.start().unwrap();
            subscriber
        })
        .collect()
}

/// Poll `condition` every 10ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Answers with its inputs and counts executions and registrations.
#[derive(Default)]
pub struct RecordingCapability {
    pub executions: AtomicUsize,
    pub registrations: Mutex<Vec<RegisterToWorkflowRequest>>,
    pub unregistrations: AtomicUsize,
}

impl RecordingCapability {
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutableCapability for RecordingCapability {
    fn info(&self) -> CapabilityInfo {
        CapabilityInfo::new(EXECUTABLE_ID, CapabilityType::Action, "recording")
    }

    async fn execute(
        &self,
        _cancel: &CancellationToken,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(CapabilityResponse {
            value: request.inputs,
        })
    }

    async fn register_to_workflow(&self, request: RegisterToWorkflowRequest) -> Result<()> {
        self.registrations.lock().push(request);
        Ok(())
    }

    async fn unregister_from_workflow(&self, _request: UnregisterFromWorkflowRequest) -> Result<()> {
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A faulty member: answers with a value of its own choosing.
pub struct LyingCapability;

#[async_trait]
impl ExecutableCapability for LyingCapability {
    fn info(&self) -> CapabilityInfo {
        CapabilityInfo::new(EXECUTABLE_ID, CapabilityType::Action, "lying")
    }

    async fn execute(
        &self,
        _cancel: &CancellationToken,
        _request: CapabilityRequest,
    ) -> Result<CapabilityResponse> {
        Ok(CapabilityResponse {
            value: json!({"forged": true}),
        })
    }

    async fn register_to_workflow(&self, _request: RegisterToWorkflowRequest) -> Result<()> {
        Ok(())
    }

    async fn unregister_from_workflow(&self, _request: UnregisterFromWorkflowRequest) -> Result<()> {
        Ok(())
    }
}

/// Always fails.
pub struct FailingCapability;

#[async_trait]
impl ExecutableCapability for FailingCapability {
    fn info(&self) -> CapabilityInfo {
        CapabilityInfo::new(EXECUTABLE_ID, CapabilityType::Action, "failing")
    }

    async fn execute(
        &self,
        _cancel: &CancellationToken,
        _request: CapabilityRequest,
    ) -> Result<CapabilityResponse> {
        Err(RemoteCapabilityError::Capability("chain unavailable".to_string()))
    }

    async fn register_to_workflow(&self, _request: RegisterToWorkflowRequest) -> Result<()> {
        Ok(())
    }

    async fn unregister_from_workflow(&self, _request: UnregisterFromWorkflowRequest) -> Result<()> {
        Ok(())
    }
}

/// A trigger whose events are pushed by the test into every registration.
#[derive(Default)]
pub struct ManualTrigger {
    registrations: Mutex<HashMap<String, mpsc::Sender<TriggerResponse>>>,
}

impl ManualTrigger {
    pub fn registered_workflows(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Push `event` to every registered workflow.
    pub fn fire(&self, event: TriggerResponse) {
        for sender in self.registrations.lock().values() {
            let _ = sender.try_send(event.clone());
        }
    }
}

#[async_trait]
impl TriggerCapability for ManualTrigger {
    fn info(&self) -> CapabilityInfo {
        CapabilityInfo::new(TRIGGER_ID, CapabilityType::Trigger, "manual")
    }

    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>> {
        let (tx, rx) = mpsc::channel(16);
        self.registrations
            .lock()
            .insert(request.metadata.workflow_id, tx);
        Ok(rx)
    }

    async fn unregister_trigger(&self, request: TriggerRegistrationRequest) -> Result<()> {
        self.registrations.lock().remove(&request.metadata.workflow_id);
        Ok(())
    }
}
