//! # Inbound Ports
//!
//! The capability contracts this layer consumes and, for remote proxies,
//! re-exposes. Concrete capabilities (chain writers, HTTP actions, cron
//! triggers) live outside this crate and only implement these traits.

use crate::error::Result;
use async_trait::async_trait;
use capability_types::{
    CapabilityInfo, CapabilityRequest, CapabilityResponse, RegisterToWorkflowRequest,
    TriggerRegistrationRequest, TriggerResponse, UnregisterFromWorkflowRequest,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A capability invoked with a request and answering with a response.
#[async_trait]
pub trait ExecutableCapability: Send + Sync {
    fn info(&self) -> CapabilityInfo;

    /// Run the capability. Implementations should stop early once `cancel`
    /// fires.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse>;

    async fn register_to_workflow(&self, request: RegisterToWorkflowRequest) -> Result<()>;

    async fn unregister_from_workflow(&self, request: UnregisterFromWorkflowRequest) -> Result<()>;
}

/// A capability that produces events for registered workflows.
#[async_trait]
pub trait TriggerCapability: Send + Sync {
    fn info(&self) -> CapabilityInfo;

    /// Start delivering events for this registration. The channel closes when
    /// the registration ends.
    async fn register_trigger(
        &self,
        request: TriggerRegistrationRequest,
    ) -> Result<mpsc::Receiver<TriggerResponse>>;

    async fn unregister_trigger(&self, request: TriggerRegistrationRequest) -> Result<()>;
}
