//! Local transmission: each member of the capability DON waits for its own
//! slot in the request's schedule before running a side-effecting capability.

use crate::domain::{delay_for, TransmissionConfig};
use crate::error::{RemoteCapabilityError, Result};
use crate::ports::ExecutableCapability;
use async_trait::async_trait;
use capability_types::{
    CapabilityInfo, CapabilityRequest, CapabilityResponse, Don, PeerId, RegisterToWorkflowRequest,
    UnregisterFromWorkflowRequest,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct LocalExecutableCapability {
    underlying: Arc<dyn ExecutableCapability>,
    peer_id: PeerId,
    local_don: Don,
}

impl LocalExecutableCapability {
    pub fn new(underlying: Arc<dyn ExecutableCapability>, peer_id: PeerId, local_don: Don) -> Self {
        Self {
            underlying,
            peer_id,
            local_don,
        }
    }
}

#[async_trait]
impl ExecutableCapability for LocalExecutableCapability {
    fn info(&self) -> CapabilityInfo {
        self.underlying.info()
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: CapabilityRequest,
    ) -> Result<CapabilityResponse> {
        let schedule = TransmissionConfig::from_request_config(&request.config)?;
        let delay = delay_for(
            &self.peer_id,
            &self.local_don.members,
            &request.metadata.workflow_execution_id,
            &schedule,
        )
        .unwrap_or_default();

        if !delay.is_zero() {
            debug!(peer = %self.peer_id, delay_ms = delay.as_millis() as u64, "waiting for transmission slot");
            tokio::select! {
                _ = cancel.cancelled() => return Err(RemoteCapabilityError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.underlying.execute(cancel, request).await
    }

    async fn register_to_workflow(&self, request: RegisterToWorkflowRequest) -> Result<()> {
        self.underlying.register_to_workflow(request).await
    }

    async fn unregister_from_workflow(&self, request: UnregisterFromWorkflowRequest) -> Result<()> {
        self.underlying.unregister_from_workflow(request).await
    }
}
