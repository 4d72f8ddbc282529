//! AWS SDK integration: IAM-backed engine and caller identity.

pub(crate) mod iam_client;
pub(crate) mod sts;

use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("IAM client error: {0}")]
    IamError(String),
    #[error("Policy document error: {0}")]
    PolicyError(String),
    #[error("AWS SDK error: {0}")]
    SdkError(String),
}

pub type AwsResult<T> = Result<T, AwsError>;

impl From<AwsError> for EngineError {
    fn from(error: AwsError) -> Self {
        match error {
            AwsError::PolicyError(message) => Self::InvalidRequest(message),
            AwsError::IamError(message) | AwsError::SdkError(message) => Self::Remote(message),
        }
    }
}
