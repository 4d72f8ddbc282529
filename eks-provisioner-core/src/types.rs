//! Core type definitions for the EKS provisioner (pure Rust)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Policy language revision every trust document is written against
pub const POLICY_VERSION: &str = "2012-10-17";

/// Action granted by a trust statement
pub const ASSUME_ROLE_ACTION: &str = "sts:AssumeRole";

/// Statement effect
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Effect {
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("Allow"),
            Self::Deny => f.write_str("Deny"),
        }
    }
}

/// Actor trusted to assume the role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub service: String,
}

/// Trust policy statement structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct TrustStatement {
    pub effect: Effect,
    pub principal: Principal,
    pub action: String,
}

/// Trust policy document structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct TrustPolicyDocument {
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<TrustStatement>,
}

/// Handle to a role, as needed by downstream declarations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleHandle {
    pub name: String,
    pub arn: String,
}

/// Handle to a managed policy bound to a role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentHandle {
    pub role_name: String,
    pub policy_arn: String,
}

/// Handle to any other declared resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceHandle {
    pub kind: String,
    pub logical_name: String,
    pub id: String,
}

/// A provisioned role together with the trust policy and attachments issued for it
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Role {
    pub handle: RoleHandle,
    pub trust_policy: TrustPolicyDocument,
    pub attachments: Vec<AttachmentHandle>,
}

impl Role {
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn arn(&self) -> &str {
        &self.handle.arn
    }
}

/// Sequential step of a provisioning run, used to tag failures
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum ProvisioningStep {
    TrustPolicy,
    RoleCreation,
    PolicyAttachment { index: usize, policy_arn: String },
    Resource { logical_name: String },
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrustPolicy => f.write_str("trust policy"),
            Self::RoleCreation => f.write_str("role creation"),
            Self::PolicyAttachment { index, policy_arn } => {
                write!(f, "policy attachment #{} ({})", index + 1, policy_arn)
            }
            Self::Resource { logical_name } => write!(f, "resource '{}'", logical_name),
        }
    }
}

/// Progress of a provisioning session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionState {
    NotStarted,
    TrustPolicyBuilt,
    RoleRequested,
    /// Zero-based index of the last attachment issued
    AttachmentRequested(usize),
    ResourceRequested(String),
    Done,
    Failed {
        step: ProvisioningStep,
        cause: String,
    },
}

impl ProvisionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}
