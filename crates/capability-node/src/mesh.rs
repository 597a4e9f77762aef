//! # Capability Mesh
//!
//! Two DONs in one process, wired through the in-memory broker.
//!
//! ```text
//!   workflow DON (callers)                    capability DON (hosts)
//! ┌──────────────────────────┐             ┌──────────────────────────┐
//! │ ExecutableClient  ×N     │ ── Execute ─→│ ExecutableServer  ×N     │
//! │                          │ ←─ result ── │   └─ EchoTarget          │
//! │ TriggerSubscriber ×N     │ ─ Register ─→│ TriggerPublisher  ×N     │
//! │                          │ ←─ events ── │   └─ IntervalTrigger     │
//! └──────────────────────────┘             └──────────────────────────┘
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Build the capability DON and announce it through the `DonNotifier`
//! 2. Build the workflow DON once the capability DON is known
//! 3. Start hosts, then callers, then the broker
//!
//! Shutdown runs in the reverse order.

use crate::capabilities::{EchoTarget, IntervalTrigger, ECHO_TARGET_ID, INTERVAL_TRIGGER_ID};
use crate::config::{DonLayout, NodeConfig};
use anyhow::{bail, Context, Result};
use capability_telemetry::capability_span;
use capability_transport::{InMemoryBroker, NodeDispatcher};
use capability_types::{
    CapabilityInfo, CapabilityRequest, CapabilityResponse, CapabilityType, Don, PeerId,
    RegisterToWorkflowRequest, RegistrationMetadata, RequestMetadata, TriggerRegistrationRequest,
    TriggerResponse,
};
use remote_capabilities::{
    DonNotifier, ExecutableCapability, ExecutableClient, ExecutableServer, TriggerCapability,
    TriggerPublisher, TriggerSubscriber,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

const DEMO_WORKFLOW_OWNER: &str = "0000000000000000000000000000000000000001";
const DEMO_TRIGGER_ID: &str = "every-interval";

/// Workflow ids and execution ids are 64 hex characters.
#[must_use]
pub fn demo_id(n: u64) -> String {
    format!("{n:064x}")
}

struct CapabilityNode {
    peer_id: PeerId,
    server: Arc<ExecutableServer>,
    publisher: Arc<TriggerPublisher>,
    trigger: Arc<IntervalTrigger>,
}

struct WorkflowNode {
    peer_id: PeerId,
    client: Arc<ExecutableClient>,
    subscriber: Arc<TriggerSubscriber>,
}

/// Both DONs and the broker connecting them.
pub struct CapabilityMesh {
    config: NodeConfig,
    broker: InMemoryBroker,
    capability_don: Don,
    workflow_don: Don,
    capability_nodes: Vec<CapabilityNode>,
    workflow_nodes: Vec<WorkflowNode>,
    shutdown: CancellationToken,
}

fn build_don(layout: DonLayout) -> Don {
    let members = (0..layout.members).map(|_| PeerId::random()).collect();
    Don::new(layout.id, members, layout.f)
}

impl CapabilityMesh {
    /// Build every node. Fails if `cancel` fires before the capability DON
    /// is announced.
    pub async fn build(config: NodeConfig, cancel: &CancellationToken) -> Result<Self> {
        config.validate()?;
        let broker = InMemoryBroker::new();
        let notifier = DonNotifier::new();

        let capability_don = build_don(config.capability_don);
        let workflow_don = build_don(config.workflow_don);
        let workflow_dons = HashMap::from([(workflow_don.id, workflow_don.clone())]);

        let mut capability_nodes = Vec::with_capacity(capability_don.n());
        for &peer_id in &capability_don.members {
            let dispatcher = broker.register_node(peer_id);
            let node = Self::build_capability_node(
                &config,
                peer_id,
                &dispatcher,
                &capability_don,
                &workflow_dons,
            )?;
            capability_nodes.push(node);
        }
        notifier.notify_don_set(capability_don.clone());

        let announced = notifier
            .wait_for_don(cancel)
            .await
            .context("capability DON was never announced")?;
        let mut workflow_nodes = Vec::with_capacity(workflow_don.n());
        for &peer_id in &workflow_don.members {
            let dispatcher = broker.register_node(peer_id);
            let node = Self::build_workflow_node(&config, peer_id, &dispatcher, &announced, &workflow_don)?;
            workflow_nodes.push(node);
        }

        info!(
            capability_don = capability_don.id,
            workflow_don = workflow_don.id,
            capability_members = capability_don.n(),
            workflow_members = workflow_don.n(),
            "capability mesh built"
        );

        Ok(Self {
            config,
            broker,
            capability_don,
            workflow_don,
            capability_nodes,
            workflow_nodes,
            shutdown: cancel.child_token(),
        })
    }

    fn build_capability_node(
        config: &NodeConfig,
        peer_id: PeerId,
        dispatcher: &Arc<NodeDispatcher>,
        capability_don: &Don,
        workflow_dons: &HashMap<u32, Don>,
    ) -> Result<CapabilityNode> {
        let echo: Arc<dyn ExecutableCapability> = Arc::new(EchoTarget);
        let server = Arc::new(ExecutableServer::new(
            peer_id,
            config.executable.clone(),
            echo.clone(),
            echo.info(),
            capability_don.clone(),
            workflow_dons.clone(),
            dispatcher.clone(),
        ));
        dispatcher.set_receiver(ECHO_TARGET_ID, capability_don.id, server.clone())?;

        let trigger = Arc::new(IntervalTrigger::new(config.trigger_interval));
        let publisher = Arc::new(TriggerPublisher::new(
            config.trigger.clone(),
            trigger.clone(),
            trigger.info(),
            capability_don.clone(),
            workflow_dons.clone(),
            dispatcher.clone(),
        ));
        dispatcher.set_receiver(INTERVAL_TRIGGER_ID, capability_don.id, publisher.clone())?;

        Ok(CapabilityNode {
            peer_id,
            server,
            publisher,
            trigger,
        })
    }

    fn build_workflow_node(
        config: &NodeConfig,
        peer_id: PeerId,
        dispatcher: &Arc<NodeDispatcher>,
        capability_don: &Don,
        workflow_don: &Don,
    ) -> Result<WorkflowNode> {
        let echo_info = CapabilityInfo::new(ECHO_TARGET_ID, CapabilityType::Target, "remote echo")
            .with_don(capability_don.clone());
        let client = Arc::new(ExecutableClient::new(
            config.executable.clone(),
            echo_info,
            workflow_don.clone(),
            dispatcher.clone(),
        )?);
        dispatcher.set_receiver(ECHO_TARGET_ID, capability_don.id, client.clone())?;

        let trigger_info =
            CapabilityInfo::new(INTERVAL_TRIGGER_ID, CapabilityType::Trigger, "remote interval")
                .with_don(capability_don.clone());
        let subscriber = Arc::new(TriggerSubscriber::new(
            config.trigger.clone(),
            trigger_info,
            workflow_don.clone(),
            dispatcher.clone(),
            None,
        )?);
        dispatcher.set_receiver(INTERVAL_TRIGGER_ID, capability_don.id, subscriber.clone())?;

        Ok(WorkflowNode {
            peer_id,
            client,
            subscriber,
        })
    }

    /// Start hosts, then callers, then message delivery.
    pub fn start(&self) -> Result<()> {
        for node in &self.capability_nodes {
            node.server
                .start()
                .with_context(|| format!("executable server on {}", node.peer_id))?;
            node.publisher
                .start()
                .with_context(|| format!("trigger publisher on {}", node.peer_id))?;
        }
        for node in &self.workflow_nodes {
            node.client
                .start()
                .with_context(|| format!("executable client on {}", node.peer_id))?;
            node.subscriber
                .start()
                .with_context(|| format!("trigger subscriber on {}", node.peer_id))?;
        }
        self.broker.start();
        info!("capability mesh started");
        Ok(())
    }

    #[must_use]
    pub fn capability_don(&self) -> &Don {
        &self.capability_don
    }

    #[must_use]
    pub fn workflow_don(&self) -> &Don {
        &self.workflow_don
    }

    /// Register `workflow_id` with the remote target and subscribe it to the
    /// remote trigger on every workflow node.
    pub async fn register_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<mpsc::Receiver<TriggerResponse>>> {
        let mut receivers = Vec::with_capacity(self.workflow_nodes.len());
        for node in &self.workflow_nodes {
            node.client
                .register_to_workflow(RegisterToWorkflowRequest {
                    metadata: RegistrationMetadata {
                        workflow_id: workflow_id.to_string(),
                        reference_id: "write".to_string(),
                        workflow_owner: DEMO_WORKFLOW_OWNER.to_string(),
                    },
                    config: json!({}),
                })
                .await?;
            let rx = node
                .subscriber
                .register_trigger(TriggerRegistrationRequest {
                    trigger_id: DEMO_TRIGGER_ID.to_string(),
                    metadata: RequestMetadata {
                        workflow_id: workflow_id.to_string(),
                        workflow_owner: DEMO_WORKFLOW_OWNER.to_string(),
                        reference_id: "trigger".to_string(),
                        ..Default::default()
                    },
                    config: json!({}),
                })
                .await?;
            receivers.push(rx);
        }
        Ok(receivers)
    }

    /// Run the same request from every workflow node.
    pub async fn execute_everywhere(
        &self,
        request: CapabilityRequest,
    ) -> Vec<remote_capabilities::Result<CapabilityResponse>> {
        let mut calls = JoinSet::new();
        for node in &self.workflow_nodes {
            let client = node.client.clone();
            let request = request.clone();
            let cancel = self.shutdown.child_token();
            let span = capability_span!(
                "remote_execute",
                capability_id = ECHO_TARGET_ID,
                don_id = self.workflow_don.id,
                peer = %node.peer_id
            );
            calls.spawn(async move { client.execute(&cancel, request).await }.instrument(span));
        }

        let mut results = Vec::with_capacity(self.workflow_nodes.len());
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => warn!(%err, "execution task failed"),
            }
        }
        results
    }

    /// Execute once, then wait for the first trigger event on every node.
    pub async fn run_demo(&self) -> Result<()> {
        let workflow_id = demo_id(0xc0ffee);
        let mut receivers = self.register_workflow(&workflow_id).await?;

        let request = CapabilityRequest {
            metadata: RequestMetadata {
                workflow_id: workflow_id.clone(),
                workflow_owner: DEMO_WORKFLOW_OWNER.to_string(),
                workflow_name: "demo".to_string(),
                workflow_execution_id: demo_id(1),
                reference_id: "write".to_string(),
            },
            config: json!({}),
            inputs: json!({ "message": "hello from the workflow DON" }),
        };
        let results = self.execute_everywhere(request).await;
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        for result in &results {
            match result {
                Ok(response) => info!(value = %response.value, "remote execution succeeded"),
                Err(err) => warn!(%err, "remote execution failed"),
            }
        }
        if succeeded == 0 {
            bail!("no workflow node got a response from the capability DON");
        }

        for (rx, node) in receivers.iter_mut().zip(&self.workflow_nodes) {
            match tokio::time::timeout(self.config.demo_timeout, rx.recv()).await {
                Ok(Some(event)) => info!(
                    peer = %node.peer_id,
                    event_id = %event.event.id,
                    outputs = %event.event.outputs,
                    "trigger event delivered"
                ),
                Ok(None) => bail!("trigger channel closed on {}", node.peer_id),
                Err(_) => bail!("no trigger event on {} within {:?}", node.peer_id, self.config.demo_timeout),
            }
        }
        Ok(())
    }

    /// Close callers, then hosts, then the broker.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        self.shutdown.cancel();
        for node in &self.workflow_nodes {
            node.subscriber.close().await;
            node.client.close().await;
        }
        for node in &self.capability_nodes {
            node.publisher.close().await;
            node.server.close().await;
            node.trigger.stop_all();
        }
        self.broker.close().await;
        info!("Shutdown complete");
    }
}
