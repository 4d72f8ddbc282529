//! This crate provides the core logic of the EKS provisioner:
//! - Trust policy synthesis for the cluster control-plane role
//! - Role provisioning (role plus ordered managed policy attachments)
//! - Declaration of the network, cluster and bucket stack
//! - Orchestration engines: an in-memory recording engine and an IAM-backed engine
//!

mod aws;
pub mod commands;
pub mod config;
pub mod engine;
mod error;
mod synthesis;
mod types;

// Re-exports for a small, focused public API
pub use aws::iam_client::AwsIamEngine;
pub use aws::sts::CallerIdentity;
pub use aws::AwsError;
pub use commands::{declare_stack, provision_role, resource_kind, ProvisioningContext, StackOutputs};
pub use config::{ConfigError, ProvisionerConfig};
pub use engine::{
    EngineError, FailureRule, InMemoryEngine, Intent, IntentOutcome, IntentRecord,
    ProvisioningEngine,
};
pub use error::{ProvisionError, ProvisionResult};
pub use synthesis::{build_trust_policy, serialize_trust_policy, validate_trust_policy};
pub use types::{
    AttachmentHandle, Effect, Principal, ProvisionState, ProvisioningStep, ResourceHandle, Role,
    RoleHandle, TrustPolicyDocument, TrustStatement, ASSUME_ROLE_ACTION, POLICY_VERSION,
};
