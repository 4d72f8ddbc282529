//! Builds the trust policy that lets a service principal assume a role.

use crate::error::{ProvisionError, ProvisionResult};
use crate::types::{
    Effect, Principal, TrustPolicyDocument, TrustStatement, ASSUME_ROLE_ACTION, POLICY_VERSION,
};

/// Actions accepted in a trust statement
const TRUST_ACTIONS: &[&str] = &[
    ASSUME_ROLE_ACTION,
    "sts:AssumeRoleWithSAML",
    "sts:AssumeRoleWithWebIdentity",
    "sts:SetSourceIdentity",
    "sts:TagSession",
];

impl TrustStatement {
    /// Allow `service_principal` to assume the role
    pub fn allow_service(service_principal: impl Into<String>) -> Self {
        Self {
            effect: Effect::Allow,
            principal: Principal {
                service: service_principal.into(),
            },
            action: ASSUME_ROLE_ACTION.to_string(),
        }
    }
}

/// Build a single-statement trust policy for `service_principal`.
/// The principal is embedded verbatim.
pub fn build_trust_policy(service_principal: &str) -> TrustPolicyDocument {
    TrustPolicyDocument {
        version: POLICY_VERSION.to_string(),
        statements: vec![TrustStatement::allow_service(service_principal)],
    }
}

/// Check the structural invariants of a trust document
pub fn validate_trust_policy(document: &TrustPolicyDocument) -> ProvisionResult<()> {
    if document.version != POLICY_VERSION {
        return Err(ProvisionError::serialization(format!(
            "unsupported policy version '{}'",
            document.version
        )));
    }
    if document.statements.is_empty() {
        return Err(ProvisionError::serialization(
            "trust policy must contain at least one statement",
        ));
    }
    for (index, statement) in document.statements.iter().enumerate() {
        if statement.principal.service.is_empty() {
            return Err(ProvisionError::serialization(format!(
                "statement {index} has an empty service principal"
            )));
        }
        if !TRUST_ACTIONS.contains(&statement.action.as_str()) {
            return Err(ProvisionError::serialization(format!(
                "statement {index}: {} is not a trust policy action (effect {})",
                statement.action, statement.effect
            )));
        }
    }
    Ok(())
}

/// Validate and encode a trust document into the JSON format IAM expects
pub fn serialize_trust_policy(document: &TrustPolicyDocument) -> ProvisionResult<String> {
    validate_trust_policy(document)?;
    serde_json::to_string(document).map_err(|e| ProvisionError::serialization(e.to_string()))
}
