//! Role provisioning: trust policy, role, then managed policy attachments in order.

use log::{debug, info};

use super::context::ProvisioningContext;
use crate::engine::{AttachmentRequest, RoleRequest};
use crate::error::ProvisionResult;
use crate::synthesis::{build_trust_policy, serialize_trust_policy};
use crate::types::{ProvisionState, ProvisioningStep, Role};

/// Ensure a role trusted by `service_principal` exists and carries every policy in
/// `managed_policy_refs`.
///
/// Each intent is issued only after the previous one succeeded. The first failure ends the
/// run: later attachments are never issued and nothing already issued is rolled back.
/// Retries and cleanup belong to the engine. A context that already finished is refused
/// without issuing anything.
pub async fn provision_role(
    ctx: &mut ProvisioningContext<'_>,
    role_name: &str,
    service_principal: &str,
    managed_policy_refs: &[String],
) -> ProvisionResult<Role> {
    ctx.ensure_open()?;
    let role = ensure_role_steps(ctx, role_name, service_principal, managed_policy_refs).await?;
    ctx.transition(ProvisionState::Done);
    Ok(role)
}

/// Role steps without the final transition, so a caller can keep declaring afterwards
pub(crate) async fn ensure_role_steps(
    ctx: &mut ProvisioningContext<'_>,
    role_name: &str,
    service_principal: &str,
    managed_policy_refs: &[String],
) -> ProvisionResult<Role> {
    let trust_policy = build_trust_policy(service_principal);
    let assume_role_policy =
        serialize_trust_policy(&trust_policy).map_err(|e| ctx.fail_serialization(e))?;
    debug!("Trust policy for role '{}': {}", role_name, assume_role_policy);
    ctx.transition(ProvisionState::TrustPolicyBuilt);

    let engine = ctx.engine();

    info!("Ensuring role '{}' trusted by {}", role_name, service_principal);
    ctx.transition(ProvisionState::RoleRequested);
    let handle = engine
        .ensure_role(&RoleRequest {
            name: role_name.to_string(),
            assume_role_policy,
        })
        .await
        .map_err(|e| ctx.fail(ProvisioningStep::RoleCreation, e))?;

    let mut attachments = Vec::with_capacity(managed_policy_refs.len());
    for (index, policy_arn) in managed_policy_refs.iter().enumerate() {
        info!("Attaching {} to role '{}'", policy_arn, handle.name);
        ctx.transition(ProvisionState::AttachmentRequested(index));
        let attachment = engine
            .ensure_role_policy_attachment(&AttachmentRequest {
                role_name: handle.name.clone(),
                policy_arn: policy_arn.clone(),
            })
            .await
            .map_err(|e| {
                ctx.fail(
                    ProvisioningStep::PolicyAttachment {
                        index,
                        policy_arn: policy_arn.clone(),
                    },
                    e,
                )
            })?;
        attachments.push(attachment);
    }

    Ok(Role {
        handle,
        trust_policy,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        EngineError, FailureRule, InMemoryEngine, Intent, IntentOutcome, ProvisioningEngine,
    };
    use crate::error::ProvisionError;
    use proptest::prelude::*;

    const CLUSTER_POLICY: &str = "arn:aws:iam::aws:policy/AmazonEKSClusterPolicy";
    const SERVICE_POLICY: &str = "arn:aws:iam::aws:policy/AmazonEKSServicePolicy";

    fn eks_policies() -> Vec<String> {
        vec![CLUSTER_POLICY.to_string(), SERVICE_POLICY.to_string()]
    }

    fn attachment_intents(engine: &InMemoryEngine) -> Vec<(String, String)> {
        engine
            .intents()
            .into_iter()
            .filter_map(|record| match record.intent {
                Intent::EnsureRolePolicyAttachment {
                    role_name,
                    policy_arn,
                } => Some((role_name, policy_arn)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_provision_eks_cluster_role() {
        let engine = InMemoryEngine::new();
        let mut ctx = ProvisioningContext::new(&engine);

        let role = provision_role(
            &mut ctx,
            "eks-cluster-role",
            "eks.amazonaws.com",
            &eks_policies(),
        )
        .await
        .unwrap();

        assert_eq!(role.name(), "eks-cluster-role");
        assert_eq!(role.arn(), "arn:aws:iam::000000000000:role/eks-cluster-role");
        assert_eq!(
            serde_json::to_string(&role.trust_policy).unwrap(),
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"Service":"eks.amazonaws.com"},"Action":"sts:AssumeRole"}]}"#
        );
        assert_eq!(
            attachment_intents(&engine),
            vec![
                ("eks-cluster-role".to_string(), CLUSTER_POLICY.to_string()),
                ("eks-cluster-role".to_string(), SERVICE_POLICY.to_string()),
            ]
        );
        assert_eq!(role.attachments.len(), 2);
        assert_eq!(ctx.state(), &ProvisionState::Done);
    }

    #[tokio::test]
    async fn test_role_failure_issues_no_attachments() {
        let engine = InMemoryEngine::new().with_failure(FailureRule::RoleCreation);
        let mut ctx = ProvisioningContext::new(&engine);

        let err = provision_role(
            &mut ctx,
            "eks-cluster-role",
            "eks.amazonaws.com",
            &eks_policies(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Provisioning {
                step: ProvisioningStep::RoleCreation,
                source: EngineError::Remote(_),
            }
        ));
        assert!(attachment_intents(&engine).is_empty());
        assert!(matches!(
            ctx.state(),
            ProvisionState::Failed {
                step: ProvisioningStep::RoleCreation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_attachment_failure_stops_remaining_attachments() {
        let policies = vec![
            "arn:aws:iam::aws:policy/A".to_string(),
            "arn:aws:iam::aws:policy/B".to_string(),
            "arn:aws:iam::aws:policy/C".to_string(),
        ];
        let engine = InMemoryEngine::new().with_failure(FailureRule::Attachment {
            policy_arn: policies[1].clone(),
        });
        let mut ctx = ProvisioningContext::new(&engine);

        let err = provision_role(&mut ctx, "role", "eks.amazonaws.com", &policies)
            .await
            .unwrap_err();

        assert_eq!(
            err.step(),
            Some(&ProvisioningStep::PolicyAttachment {
                index: 1,
                policy_arn: policies[1].clone(),
            })
        );
        let issued: Vec<String> = attachment_intents(&engine)
            .into_iter()
            .map(|(_, arn)| arn)
            .collect();
        assert_eq!(issued, policies[..2].to_vec());
        // no rollback of what already succeeded
        assert_eq!(engine.attached_policies("role"), policies[..1].to_vec());
    }

    #[tokio::test]
    async fn test_serialization_failure_issues_nothing() {
        let engine = InMemoryEngine::new();
        let mut ctx = ProvisioningContext::new(&engine);

        let err = provision_role(&mut ctx, "role", "", &eks_policies())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Serialization(_)));
        assert!(engine.intents().is_empty());
        assert!(matches!(
            ctx.state(),
            ProvisionState::Failed {
                step: ProvisioningStep::TrustPolicy,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_role_name_is_delegated_to_engine() {
        let engine = InMemoryEngine::new();
        let mut ctx = ProvisioningContext::new(&engine);

        let err = provision_role(&mut ctx, "", "eks.amazonaws.com", &eks_policies())
            .await
            .unwrap_err();

        assert_eq!(err.step(), Some(&ProvisioningStep::RoleCreation));
        assert_eq!(engine.intents().len(), 1);
    }

    #[tokio::test]
    async fn test_rerun_issues_no_mutation() {
        let engine = InMemoryEngine::new();

        let mut first = ProvisioningContext::new(&engine);
        provision_role(
            &mut first,
            "eks-cluster-role",
            "eks.amazonaws.com",
            &eks_policies(),
        )
        .await
        .unwrap();
        assert!(engine.intents().iter().all(|r| r.is_mutating()));
        engine.clear_intents();

        let mut second = ProvisioningContext::new(&engine);
        let role = provision_role(
            &mut second,
            "eks-cluster-role",
            "eks.amazonaws.com",
            &eks_policies(),
        )
        .await
        .unwrap();

        let records = engine.intents();
        assert_eq!(records.len(), 3);
        assert!(records
            .iter()
            .all(|r| r.outcome == IntentOutcome::Unchanged));
        assert_eq!(role.attachments.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_policy_list_creates_role_only() {
        let engine = InMemoryEngine::new();
        let mut ctx = ProvisioningContext::new(&engine);

        let role = provision_role(&mut ctx, "role", "eks.amazonaws.com", &[])
            .await
            .unwrap();

        assert!(role.attachments.is_empty());
        assert_eq!(engine.intents().len(), 1);
        assert_eq!(ctx.state(), &ProvisionState::Done);
    }

    proptest! {
        #[test]
        fn prop_one_attachment_per_policy_in_order(
            role_name in "[A-Za-z0-9+=,.@_-]{1,64}",
            policies in proptest::collection::vec("arn:aws:iam::aws:policy/[A-Za-z]{1,20}", 0..8),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let engine = InMemoryEngine::new();
            let role = runtime.block_on(async {
                let mut ctx = ProvisioningContext::new(&engine);
                provision_role(&mut ctx, &role_name, "eks.amazonaws.com", &policies).await
            }).unwrap();

            let intents = attachment_intents(&engine);
            prop_assert_eq!(intents.len(), policies.len());
            for ((attached_to, arn), expected) in intents.iter().zip(&policies) {
                prop_assert_eq!(attached_to, &role_name);
                prop_assert_eq!(arn, expected);
            }
            prop_assert_eq!(role.attachments.len(), policies.len());
        }

        #[test]
        fn prop_kth_failure_stops_sequence(count in 1usize..8, fail_at in 0usize..8) {
            let fail_at = fail_at % count;
            let policies: Vec<String> = (0..count)
                .map(|i| format!("arn:aws:iam::aws:policy/P{i}"))
                .collect();
            let engine = InMemoryEngine::new().with_failure(FailureRule::Attachment {
                policy_arn: policies[fail_at].clone(),
            });
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let result = runtime.block_on(async {
                let mut ctx = ProvisioningContext::new(&engine);
                provision_role(&mut ctx, "role", "eks.amazonaws.com", &policies).await
            });

            prop_assert!(result.is_err());
            prop_assert_eq!(attachment_intents(&engine).len(), fail_at + 1);
        }
    }

    #[tokio::test]
    async fn test_failed_session_cannot_be_reused() {
        let engine = InMemoryEngine::new().with_failure(FailureRule::RoleCreation);
        let mut ctx = ProvisioningContext::new(&engine);
        provision_role(&mut ctx, "role", "eks.amazonaws.com", &eks_policies())
            .await
            .unwrap_err();
        let failed = ctx.state().clone();

        let err = provision_role(&mut ctx, "other-role", "eks.amazonaws.com", &eks_policies())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::SessionFinished(_)));
        assert!(err.step().is_none());
        assert_eq!(engine.intents().len(), 1);
        assert_eq!(ctx.state(), &failed);
    }

    #[tokio::test]
    async fn test_done_session_cannot_be_reused() {
        let engine = InMemoryEngine::new();
        let mut ctx = ProvisioningContext::new(&engine);
        provision_role(&mut ctx, "role", "eks.amazonaws.com", &[])
            .await
            .unwrap();

        let err = provision_role(&mut ctx, "role", "eks.amazonaws.com", &eks_policies())
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Provisioning session already finished (done)"
        );
        assert_eq!(engine.intents().len(), 1);
        assert_eq!(ctx.state(), &ProvisionState::Done);
    }

    #[tokio::test]
    async fn test_role_steps_leave_session_open() {
        let engine = InMemoryEngine::new();
        let mut ctx = ProvisioningContext::new(&engine);

        ensure_role_steps(&mut ctx, "role", "eks.amazonaws.com", &eks_policies())
            .await
            .unwrap();

        assert_eq!(ctx.state(), &ProvisionState::AttachmentRequested(1));
        assert!(!ctx.state().is_terminal());
    }

    #[tokio::test]
    async fn test_engine_is_used_through_trait_object() {
        let engine = InMemoryEngine::new();
        let dyn_engine: &dyn ProvisioningEngine = &engine;
        let mut ctx = ProvisioningContext::new(dyn_engine);
        assert!(provision_role(&mut ctx, "r", "eks.amazonaws.com", &eks_policies())
            .await
            .is_ok());
    }
}
