//! Capability request/response payloads and their byte encoding.
//!
//! Payloads are JSON. `serde_json` keeps object keys sorted, so two nodes that
//! hold equal values always produce identical bytes.

use crate::errors::PayloadError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Encode a payload.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, PayloadError> {
    serde_json::to_vec(value).map_err(|e| PayloadError::Marshal(e.to_string()))
}

/// Decode a payload.
pub fn from_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PayloadError> {
    serde_json::from_slice(bytes).map_err(|e| PayloadError::Unmarshal(e.to_string()))
}

/// Who is asking, on behalf of which workflow step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub workflow_id: String,
    pub workflow_owner: String,
    pub workflow_name: String,
    pub workflow_execution_id: String,
    pub reference_id: String,
}

/// A single invocation of an executable capability.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub metadata: RequestMetadata,
    /// Step configuration, including the optional transmission schedule.
    pub config: Value,
    pub inputs: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub value: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationMetadata {
    pub workflow_id: String,
    pub reference_id: String,
    pub workflow_owner: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterToWorkflowRequest {
    pub metadata: RegistrationMetadata,
    pub config: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UnregisterFromWorkflowRequest {
    pub metadata: RegistrationMetadata,
    pub config: Value,
}

/// A workflow's interest in a trigger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerRegistrationRequest {
    pub trigger_id: String,
    pub metadata: RequestMetadata,
    pub config: Value,
}

/// One occurrence of a trigger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_type: String,
    /// Stable across every node that observes the same occurrence.
    pub id: String,
    pub outputs: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub event: TriggerEvent,
    pub err: Option<String>,
}
