//! Provisioning session
//!
//! A [`ProvisioningContext`] is the handle for one provisioning run. It carries the engine
//! every intent is issued against and the progress of the run, and is passed explicitly to
//! every operation instead of living in global state.

use log::{debug, info, warn};

use crate::engine::{EngineError, ProvisioningEngine, ResourceRequest};
use crate::error::{ProvisionError, ProvisionResult};
use crate::types::{ProvisionState, ProvisioningStep, ResourceHandle};

pub struct ProvisioningContext<'a> {
    engine: &'a dyn ProvisioningEngine,
    state: ProvisionState,
}

impl<'a> ProvisioningContext<'a> {
    pub fn new(engine: &'a dyn ProvisioningEngine) -> Self {
        Self {
            engine,
            state: ProvisionState::NotStarted,
        }
    }

    pub fn engine(&self) -> &'a dyn ProvisioningEngine {
        self.engine
    }

    pub fn state(&self) -> &ProvisionState {
        &self.state
    }

    /// Refuse further intents once the session reached `Done` or `Failed`
    pub(crate) fn ensure_open(&self) -> ProvisionResult<()> {
        match &self.state {
            ProvisionState::Done => Err(ProvisionError::SessionFinished("done".to_string())),
            ProvisionState::Failed { step, .. } => Err(ProvisionError::SessionFinished(format!(
                "failed at {step}"
            ))),
            _ => Ok(()),
        }
    }

    pub(crate) fn transition(&mut self, next: ProvisionState) {
        debug!("Provisioning state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Move to the terminal failed state and build the error for the caller
    pub(crate) fn fail(&mut self, step: ProvisioningStep, source: EngineError) -> ProvisionError {
        warn!("Provisioning failed at {}: {}", step, source);
        self.transition(ProvisionState::Failed {
            step: step.clone(),
            cause: source.to_string(),
        });
        ProvisionError::Provisioning { step, source }
    }

    /// Serialization failures happen before any engine call
    pub(crate) fn fail_serialization(&mut self, error: ProvisionError) -> ProvisionError {
        warn!("{}", error);
        self.transition(ProvisionState::Failed {
            step: ProvisioningStep::TrustPolicy,
            cause: error.to_string(),
        });
        error
    }

    /// Issue one resource declaration, passed verbatim to the engine
    pub async fn declare(
        &mut self,
        kind: &str,
        logical_name: &str,
        properties: serde_json::Value,
    ) -> ProvisionResult<ResourceHandle> {
        self.ensure_open()?;
        let request = ResourceRequest::new(kind, logical_name, properties);
        self.transition(ProvisionState::ResourceRequested(logical_name.to_string()));
        info!("Ensuring {} '{}'", kind, logical_name);

        let engine = self.engine;
        engine.ensure_resource(&request).await.map_err(|e| {
            self.fail(
                ProvisioningStep::Resource {
                    logical_name: logical_name.to_string(),
                },
                e,
            )
        })
    }
}
