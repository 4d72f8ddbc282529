//! Orchestration engine contract.
//!
//! The provisioner never talks to a cloud API itself. Every declaration is issued as an
//! "ensure" intent against a [`ProvisioningEngine`], which decides whether that means
//! create, update or no-op against the state it already knows about.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::types::{AttachmentHandle, ResourceHandle, RoleHandle};

pub use memory::{FailureRule, InMemoryEngine, Intent, IntentOutcome, IntentRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Resource conflict: {0}")]
    Conflict(String),
    #[error("Unsupported resource kind: {0}")]
    Unsupported(String),
    #[error("Remote call failed: {0}")]
    Remote(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Ensure a role exists with the given (already serialized) trust policy
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoleRequest {
    pub name: String,
    pub assume_role_policy: String,
}

/// Ensure a managed policy is attached to a role
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AttachmentRequest {
    pub role_name: String,
    pub policy_arn: String,
}

/// Ensure a generic resource exists with the given properties, passed verbatim
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResourceRequest {
    pub kind: String,
    pub logical_name: String,
    pub properties: serde_json::Value,
}

impl ResourceRequest {
    pub fn new(
        kind: impl Into<String>,
        logical_name: impl Into<String>,
        properties: serde_json::Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            logical_name: logical_name.into(),
            properties,
        }
    }
}

#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    async fn ensure_role(&self, request: &RoleRequest) -> EngineResult<RoleHandle>;

    async fn ensure_role_policy_attachment(
        &self,
        request: &AttachmentRequest,
    ) -> EngineResult<AttachmentHandle>;

    async fn ensure_resource(&self, request: &ResourceRequest) -> EngineResult<ResourceHandle>;
}
