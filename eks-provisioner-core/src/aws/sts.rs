//! Caller identity, resolved once before anything is provisioned

use aws_sdk_sts::Client as StsClient;
use serde::Serialize;

use crate::aws::{AwsError, AwsResult};

/// Principal the configured credentials act as
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

pub async fn caller_identity(client: &StsClient) -> AwsResult<CallerIdentity> {
    let out = client
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| AwsError::SdkError(format!("Failed to resolve caller identity: {e}")))?;
    identity_from_parts(out.account(), out.arn())
}

/// Both fields are required; an identity without an account cannot own a role.
pub(crate) fn identity_from_parts(
    account: Option<&str>,
    arn: Option<&str>,
) -> AwsResult<CallerIdentity> {
    match (account, arn) {
        (Some(account), Some(arn)) if !account.is_empty() && !arn.is_empty() => {
            Ok(CallerIdentity {
                account: account.to_string(),
                arn: arn.to_string(),
            })
        }
        (account, arn) => Err(AwsError::SdkError(format!(
            "Incomplete caller identity (account: {}, arn: {})",
            account.unwrap_or("<missing>"),
            arn.unwrap_or("<missing>")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_complete_response() {
        let identity = identity_from_parts(
            Some("123456789012"),
            Some("arn:aws:sts::123456789012:assumed-role/deployer/session"),
        )
        .unwrap();
        assert_eq!(identity.account, "123456789012");
        assert_eq!(
            identity.arn,
            "arn:aws:sts::123456789012:assumed-role/deployer/session"
        );
    }

    #[test]
    fn test_identity_without_account_is_rejected() {
        let err = identity_from_parts(None, Some("arn:aws:iam::123456789012:user/ops")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "AWS SDK error: Incomplete caller identity (account: <missing>, arn: arn:aws:iam::123456789012:user/ops)"
        );

        assert!(identity_from_parts(Some(""), Some("arn")).is_err());
        assert!(identity_from_parts(Some("123456789012"), None).is_err());
    }
}
