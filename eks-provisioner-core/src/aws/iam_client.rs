//! IAM-backed engine.
//!
//! Materializes role and attachment intents against the IAM API with ensure semantics:
//! each intent reads current state first and only mutates what differs.
// TODO: add EC2/EKS/S3 clients so `ensure_resource` can materialize the network and cluster.

use async_trait::async_trait;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_sts::Client as StsClient;
use log::{debug, info};

use crate::aws::sts::{caller_identity, CallerIdentity};
use crate::aws::{AwsError, AwsResult};
use crate::engine::{
    AttachmentRequest, EngineError, EngineResult, ProvisioningEngine, ResourceRequest, RoleRequest,
};
use crate::types::{AttachmentHandle, ResourceHandle, RoleHandle};

/// Role as currently known to IAM
pub(crate) struct ExistingRole {
    arn: String,
    /// URL-encoded, as IAM returns it
    assume_role_policy: Option<String>,
}

pub struct AwsIamEngine {
    client: IamClient,
    sts_client: StsClient,
}

impl AwsIamEngine {
    pub fn new(client: IamClient, sts_client: StsClient) -> Self {
        Self { client, sts_client }
    }

    /// Build clients from the standard credential provider chain
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(IamClient::new(&config), StsClient::new(&config))
    }

    /// Account and principal the engine provisions as
    pub async fn caller_identity(&self) -> AwsResult<CallerIdentity> {
        caller_identity(&self.sts_client).await
    }

    async fn get_role(&self, role_name: &str) -> AwsResult<Option<ExistingRole>> {
        match self.client.get_role().role_name(role_name).send().await {
            Ok(output) => {
                let role = output.role().ok_or_else(|| {
                    AwsError::IamError(format!("GetRole returned no role for '{role_name}'"))
                })?;
                Ok(Some(ExistingRole {
                    arn: role.arn().to_string(),
                    assume_role_policy: role.assume_role_policy_document().map(str::to_string),
                }))
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception()) =>
            {
                Ok(None)
            }
            Err(e) => Err(AwsError::IamError(format!(
                "Failed to get role '{role_name}': {e:?}"
            ))),
        }
    }

    async fn create_role(&self, role_name: &str, policy_json: &str) -> AwsResult<String> {
        let output = self
            .client
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(policy_json)
            .send()
            .await
            .map_err(|e| {
                AwsError::IamError(format!("Failed to create role '{role_name}': {e:?}"))
            })?;
        output
            .role()
            .map(|role| role.arn().to_string())
            .ok_or_else(|| {
                AwsError::IamError(format!("CreateRole returned no role for '{role_name}'"))
            })
    }

    async fn update_assume_role_policy(&self, role_name: &str, policy_json: &str) -> AwsResult<()> {
        self.client
            .update_assume_role_policy()
            .role_name(role_name)
            .policy_document(policy_json)
            .send()
            .await
            .map_err(|e| {
                AwsError::IamError(format!(
                    "Failed to update trust policy of role '{role_name}': {e:?}"
                ))
            })?;
        Ok(())
    }

    /// List all managed policy ARNs attached to a role, following pagination
    async fn attached_policy_arns(&self, role_name: &str) -> AwsResult<Vec<String>> {
        let mut arns = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let output = self
                .client
                .list_attached_role_policies()
                .role_name(role_name)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| {
                    AwsError::IamError(format!(
                        "Failed to list attached policies of role '{role_name}': {e:?}"
                    ))
                })?;
            arns.extend(
                output
                    .attached_policies()
                    .iter()
                    .filter_map(|policy| policy.policy_arn().map(str::to_string)),
            );
            marker = next_marker(output.is_truncated(), output.marker());
            if marker.is_none() {
                return Ok(arns);
            }
        }
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> AwsResult<()> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| {
                AwsError::IamError(format!(
                    "Failed to attach '{policy_arn}' to role '{role_name}': {e:?}"
                ))
            })?;
        Ok(())
    }
}

/// What `ensure_role` has to do for a role, given what IAM currently holds
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RoleAction {
    Create,
    UpdateTrustPolicy { arn: String },
    Keep { arn: String },
}

/// Decide the role action. A role without a readable trust policy is rewritten.
pub(crate) fn plan_role_action(
    existing: Option<ExistingRole>,
    desired_policy: &str,
) -> AwsResult<RoleAction> {
    let Some(existing) = existing else {
        return Ok(RoleAction::Create);
    };
    let unchanged = match existing.assume_role_policy.as_deref() {
        Some(current) => same_policy_document(current, desired_policy)?,
        None => false,
    };
    Ok(if unchanged {
        RoleAction::Keep { arn: existing.arn }
    } else {
        RoleAction::UpdateTrustPolicy { arn: existing.arn }
    })
}

pub(crate) fn needs_attachment(attached: &[String], policy_arn: &str) -> bool {
    !attached.iter().any(|arn| arn == policy_arn)
}

/// Marker for the next ListAttachedRolePolicies page, or `None` when listing is complete
pub(crate) fn next_marker(is_truncated: bool, marker: Option<&str>) -> Option<String> {
    if is_truncated {
        marker.map(str::to_string)
    } else {
        None
    }
}

/// Compare an IAM-returned (URL-encoded) policy document with the desired JSON.
/// Key order and whitespace are not significant.
pub(crate) fn same_policy_document(existing_encoded: &str, desired: &str) -> AwsResult<bool> {
    let decoded = percent_encoding::percent_decode_str(existing_encoded)
        .decode_utf8()
        .map_err(|e| AwsError::PolicyError(format!("Failed to URL decode policy document: {e}")))?;
    let existing: serde_json::Value = serde_json::from_str(&decoded).map_err(|e| {
        AwsError::PolicyError(format!("Failed to parse existing policy document JSON: {e}"))
    })?;
    let desired: serde_json::Value = serde_json::from_str(desired).map_err(|e| {
        AwsError::PolicyError(format!("Failed to parse desired policy document JSON: {e}"))
    })?;
    Ok(existing == desired)
}

#[async_trait]
impl ProvisioningEngine for AwsIamEngine {
    async fn ensure_role(&self, request: &RoleRequest) -> EngineResult<RoleHandle> {
        let existing = self.get_role(&request.name).await?;
        let arn = match plan_role_action(existing, &request.assume_role_policy)? {
            RoleAction::Create => {
                info!("Creating IAM role '{}'", request.name);
                self.create_role(&request.name, &request.assume_role_policy)
                    .await?
            }
            RoleAction::UpdateTrustPolicy { arn } => {
                info!("Updating trust policy of IAM role '{}'", request.name);
                self.update_assume_role_policy(&request.name, &request.assume_role_policy)
                    .await?;
                arn
            }
            RoleAction::Keep { arn } => {
                debug!("IAM role '{}' is up to date", request.name);
                arn
            }
        };

        Ok(RoleHandle {
            name: request.name.clone(),
            arn,
        })
    }

    async fn ensure_role_policy_attachment(
        &self,
        request: &AttachmentRequest,
    ) -> EngineResult<AttachmentHandle> {
        let attached = self.attached_policy_arns(&request.role_name).await?;
        if needs_attachment(&attached, &request.policy_arn) {
            info!(
                "Attaching '{}' to IAM role '{}'",
                request.policy_arn, request.role_name
            );
            self.attach_role_policy(&request.role_name, &request.policy_arn)
                .await?;
        } else {
            debug!(
                "'{}' already attached to IAM role '{}'",
                request.policy_arn, request.role_name
            );
        }

        Ok(AttachmentHandle {
            role_name: request.role_name.clone(),
            policy_arn: request.policy_arn.clone(),
        })
    }

    async fn ensure_resource(&self, request: &ResourceRequest) -> EngineResult<ResourceHandle> {
        Err(EngineError::Unsupported(format!(
            "{} ('{}') cannot be provisioned through IAM",
            request.kind, request.logical_name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESIRED: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"eks.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#;

    #[test]
    fn test_same_policy_document_decodes_iam_encoding() {
        let encoded = "%7B%22Version%22%3A%222012-10-17%22%2C%22Statement%22%3A%5B%7B%22Effect%22%3A%22Allow%22%2C%22Principal%22%3A%7B%22Service%22%3A%22eks.amazonaws.com%22%7D%2C%22Action%22%3A%22sts%3AAssumeRole%22%7D%5D%7D";
        assert!(same_policy_document(encoded, DESIRED).unwrap());
    }

    #[test]
    fn test_same_policy_document_ignores_key_order() {
        let existing = r#"{"Statement":[{"Action":"sts:AssumeRole","Principal":{"Service":"eks.amazonaws.com"},"Effect":"Allow"}],"Version":"2012-10-17"}"#;
        assert!(same_policy_document(existing, DESIRED).unwrap());
    }

    #[test]
    fn test_same_policy_document_detects_drift() {
        let existing = DESIRED.replace("eks.amazonaws.com", "ec2.amazonaws.com");
        assert!(!same_policy_document(&existing, DESIRED).unwrap());
    }

    #[test]
    fn test_same_policy_document_rejects_garbage() {
        let err = same_policy_document("not json", DESIRED).unwrap_err();
        assert!(matches!(err, AwsError::PolicyError(_)));
        assert!(matches!(EngineError::from(err), EngineError::InvalidRequest(_)));
    }

    fn existing(policy: Option<&str>) -> Option<ExistingRole> {
        Some(ExistingRole {
            arn: "arn:aws:iam::123456789012:role/eks-cluster-role".to_string(),
            assume_role_policy: policy.map(str::to_string),
        })
    }

    #[test]
    fn test_missing_role_is_created() {
        assert_eq!(plan_role_action(None, DESIRED).unwrap(), RoleAction::Create);
    }

    #[test]
    fn test_matching_role_is_kept() {
        let action = plan_role_action(existing(Some(DESIRED)), DESIRED).unwrap();
        assert_eq!(
            action,
            RoleAction::Keep {
                arn: "arn:aws:iam::123456789012:role/eks-cluster-role".to_string()
            }
        );
    }

    #[test]
    fn test_drifted_trust_policy_is_updated() {
        let drifted = DESIRED.replace("eks.amazonaws.com", "ec2.amazonaws.com");
        let action = plan_role_action(existing(Some(&drifted)), DESIRED).unwrap();
        assert!(matches!(action, RoleAction::UpdateTrustPolicy { .. }));

        // IAM returned no document at all
        let action = plan_role_action(existing(None), DESIRED).unwrap();
        assert!(matches!(action, RoleAction::UpdateTrustPolicy { .. }));
    }

    #[test]
    fn test_unreadable_trust_policy_is_an_error() {
        let err = plan_role_action(existing(Some("%7Bnot json")), DESIRED).unwrap_err();
        assert!(matches!(err, AwsError::PolicyError(_)));
    }

    #[test]
    fn test_attachment_only_when_absent() {
        let attached = vec![
            "arn:aws:iam::aws:policy/AmazonEKSClusterPolicy".to_string(),
            "arn:aws:iam::aws:policy/AmazonEKSServicePolicy".to_string(),
        ];
        assert!(!needs_attachment(
            &attached,
            "arn:aws:iam::aws:policy/AmazonEKSServicePolicy"
        ));
        assert!(needs_attachment(
            &attached,
            "arn:aws:iam::aws:policy/AmazonEKSVPCResourceController"
        ));
        assert!(needs_attachment(&[], "arn:aws:iam::aws:policy/AmazonEKSClusterPolicy"));
    }

    #[test]
    fn test_pagination_follows_marker_while_truncated() {
        assert_eq!(next_marker(true, Some("page-2")), Some("page-2".to_string()));
        assert_eq!(next_marker(false, Some("page-2")), None);
        assert_eq!(next_marker(false, None), None);
        // a truncated page without a marker cannot be continued
        assert_eq!(next_marker(true, None), None);
    }

    #[test]
    fn test_iam_errors_map_to_remote() {
        let err = EngineError::from(AwsError::IamError("throttled".to_string()));
        assert_eq!(err, EngineError::Remote("throttled".to_string()));
    }
}
