//! Error types for provisioning runs

use crate::engine::EngineError;
use crate::types::ProvisioningStep;
use thiserror::Error;

/// Errors surfaced by a provisioning run. The first failing step aborts the run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The trust policy could not be encoded into the policy document format.
    /// No engine call has been issued.
    #[error("Failed to serialize trust policy: {0}")]
    Serialization(String),

    /// An engine call failed; nothing after `step` was issued and nothing is rolled back.
    #[error("Provisioning failed at {step}: {source}")]
    Provisioning {
        step: ProvisioningStep,
        #[source]
        source: EngineError,
    },

    /// The session already reached `Done` or `Failed`; nothing was issued.
    #[error("Provisioning session already finished ({0})")]
    SessionFinished(String),
}

impl ProvisionError {
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Step that failed, if an engine call was involved
    pub fn step(&self) -> Option<&ProvisioningStep> {
        match self {
            Self::Serialization(_) | Self::SessionFinished(_) => None,
            Self::Provisioning { step, .. } => Some(step),
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
