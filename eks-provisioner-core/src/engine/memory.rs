//! In-memory orchestration engine.
//!
//! Keeps the materialized state of every declaration and records each intent it receives
//! together with what it did about it. Used for dry-run plans and contract tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::debug;
use serde::Serialize;

use super::{
    AttachmentRequest, EngineError, EngineResult, ProvisioningEngine, ResourceRequest, RoleRequest,
};
use crate::types::{AttachmentHandle, ResourceHandle, RoleHandle};

const DEFAULT_ACCOUNT_ID: &str = "000000000000";

/// Intent received by the engine
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    EnsureRole {
        name: String,
    },
    EnsureRolePolicyAttachment {
        role_name: String,
        policy_arn: String,
    },
    EnsureResource {
        kind: String,
        logical_name: String,
    },
}

/// What the engine did with an intent
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentOutcome {
    Created,
    Updated,
    Unchanged,
    Failed,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IntentRecord {
    pub intent: Intent,
    pub outcome: IntentOutcome,
}

impl IntentRecord {
    /// Whether the intent changed materialized state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self.outcome,
            IntentOutcome::Created | IntentOutcome::Updated
        )
    }
}

/// Injected failure, matched against incoming intents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureRule {
    RoleCreation,
    Attachment { policy_arn: String },
    Resource { logical_name: String },
}

impl FailureRule {
    fn matches(&self, intent: &Intent) -> bool {
        match (self, intent) {
            (Self::RoleCreation, Intent::EnsureRole { .. }) => true,
            (
                Self::Attachment { policy_arn },
                Intent::EnsureRolePolicyAttachment {
                    policy_arn: requested,
                    ..
                },
            ) => policy_arn == requested,
            (
                Self::Resource { logical_name },
                Intent::EnsureResource {
                    logical_name: requested,
                    ..
                },
            ) => logical_name == requested,
            _ => false,
        }
    }
}

#[derive(Debug)]
struct StoredRole {
    arn: String,
    assume_role_policy: serde_json::Value,
}

#[derive(Debug)]
struct StoredResource {
    kind: String,
    properties: serde_json::Value,
    id: String,
}

#[derive(Debug, Default)]
struct EngineState {
    roles: BTreeMap<String, StoredRole>,
    /// (role name, policy arn) in attachment order
    attachments: Vec<(String, String)>,
    resources: BTreeMap<String, StoredResource>,
    intents: Vec<IntentRecord>,
    next_id: u64,
}

impl EngineState {
    fn record(&mut self, intent: Intent, outcome: IntentOutcome) {
        debug!("Engine intent {:?} -> {:?}", intent, outcome);
        self.intents.push(IntentRecord { intent, outcome });
    }

    fn allocate_id(&mut self, kind: &str, logical_name: &str) -> String {
        self.next_id += 1;
        let prefix = match kind.rsplit(':').next().unwrap_or(kind) {
            "Vpc" => "vpc",
            "InternetGateway" => "igw",
            "RouteTable" => "rtb",
            "Subnet" => "subnet",
            "RouteTableAssociation" => "rtbassoc",
            _ => return logical_name.to_string(),
        };
        format!("{prefix}-{:017x}", self.next_id)
    }
}

/// Recording engine with ensure semantics: an intent that matches what is already
/// materialized is a no-op.
#[derive(Debug)]
pub struct InMemoryEngine {
    account_id: String,
    failures: Vec<FailureRule>,
    state: Mutex<EngineState>,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::with_account(DEFAULT_ACCOUNT_ID)
    }

    pub fn with_account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            failures: Vec::new(),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Fail every intent matching `rule` with a remote error
    #[must_use]
    pub fn with_failure(mut self, rule: FailureRule) -> Self {
        self.failures.push(rule);
        self
    }

    /// All intents received so far, in arrival order
    pub fn intents(&self) -> Vec<IntentRecord> {
        self.lock().intents.clone()
    }

    /// Forget recorded intents while keeping materialized state
    pub fn clear_intents(&self) {
        self.lock().intents.clear();
    }

    /// Policies attached to `role_name`, in attachment order
    pub fn attached_policies(&self, role_name: &str) -> Vec<String> {
        self.lock()
            .attachments
            .iter()
            .filter(|(role, _)| role == role_name)
            .map(|(_, policy_arn)| policy_arn.clone())
            .collect()
    }

    /// Trust policy currently stored for `role_name`
    pub fn assume_role_policy(&self, role_name: &str) -> Option<serde_json::Value> {
        self.lock()
            .roles
            .get(role_name)
            .map(|role| role.assume_role_policy.clone())
    }

    pub fn resource(&self, logical_name: &str) -> Option<ResourceHandle> {
        self.lock()
            .resources
            .get(logical_name)
            .map(|stored| ResourceHandle {
                kind: stored.kind.clone(),
                logical_name: logical_name.to_string(),
                id: stored.id.clone(),
            })
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected_failure(&self, intent: &Intent) -> Option<EngineError> {
        self.failures
            .iter()
            .find(|rule| rule.matches(intent))
            .map(|rule| EngineError::Remote(format!("injected failure for {rule:?}")))
    }

    fn role_arn(&self, role_name: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, role_name)
    }
}

/// Record a failed intent and return the error to the caller
fn reject<T>(state: &mut EngineState, intent: Intent, error: EngineError) -> EngineResult<T> {
    state.record(intent, IntentOutcome::Failed);
    Err(error)
}

#[async_trait]
impl ProvisioningEngine for InMemoryEngine {
    async fn ensure_role(&self, request: &RoleRequest) -> EngineResult<RoleHandle> {
        let intent = Intent::EnsureRole {
            name: request.name.clone(),
        };
        let mut state = self.lock();

        if let Some(error) = self.injected_failure(&intent) {
            return reject(&mut state, intent, error);
        }
        if request.name.is_empty() {
            return reject(
                &mut state,
                intent,
                EngineError::InvalidRequest("role name must not be empty".to_string()),
            );
        }
        let policy: serde_json::Value = match serde_json::from_str(&request.assume_role_policy) {
            Ok(policy) => policy,
            Err(e) => {
                return reject(
                    &mut state,
                    intent,
                    EngineError::InvalidRequest(format!(
                        "assume role policy is not valid JSON: {e}"
                    )),
                )
            }
        };

        let (arn, outcome) = match state.roles.get_mut(&request.name) {
            Some(existing) if existing.assume_role_policy == policy => {
                (existing.arn.clone(), IntentOutcome::Unchanged)
            }
            Some(existing) => {
                existing.assume_role_policy = policy;
                (existing.arn.clone(), IntentOutcome::Updated)
            }
            None => {
                let arn = self.role_arn(&request.name);
                state.roles.insert(
                    request.name.clone(),
                    StoredRole {
                        arn: arn.clone(),
                        assume_role_policy: policy,
                    },
                );
                (arn, IntentOutcome::Created)
            }
        };
        state.record(intent, outcome);

        Ok(RoleHandle {
            name: request.name.clone(),
            arn,
        })
    }

    async fn ensure_role_policy_attachment(
        &self,
        request: &AttachmentRequest,
    ) -> EngineResult<AttachmentHandle> {
        let intent = Intent::EnsureRolePolicyAttachment {
            role_name: request.role_name.clone(),
            policy_arn: request.policy_arn.clone(),
        };
        let mut state = self.lock();

        if let Some(error) = self.injected_failure(&intent) {
            return reject(&mut state, intent, error);
        }
        if request.policy_arn.is_empty() {
            return reject(
                &mut state,
                intent,
                EngineError::InvalidRequest("policy ARN must not be empty".to_string()),
            );
        }
        if !state.roles.contains_key(&request.role_name) {
            let message = format!("role '{}' does not exist", request.role_name);
            return reject(&mut state, intent, EngineError::InvalidRequest(message));
        }

        let key = (request.role_name.clone(), request.policy_arn.clone());
        let outcome = if state.attachments.contains(&key) {
            IntentOutcome::Unchanged
        } else {
            state.attachments.push(key);
            IntentOutcome::Created
        };
        state.record(intent, outcome);

        Ok(AttachmentHandle {
            role_name: request.role_name.clone(),
            policy_arn: request.policy_arn.clone(),
        })
    }

    async fn ensure_resource(&self, request: &ResourceRequest) -> EngineResult<ResourceHandle> {
        let intent = Intent::EnsureResource {
            kind: request.kind.clone(),
            logical_name: request.logical_name.clone(),
        };
        let mut state = self.lock();

        if let Some(error) = self.injected_failure(&intent) {
            return reject(&mut state, intent, error);
        }
        if request.logical_name.is_empty() {
            return reject(
                &mut state,
                intent,
                EngineError::InvalidRequest("logical name must not be empty".to_string()),
            );
        }

        let declared_kind = state
            .resources
            .get(&request.logical_name)
            .map(|existing| existing.kind.clone());
        if let Some(kind) = declared_kind.filter(|kind| *kind != request.kind) {
            let message = format!(
                "'{}' is already declared as {}",
                request.logical_name, kind
            );
            return reject(&mut state, intent, EngineError::Conflict(message));
        }

        let (id, outcome) = match state.resources.get_mut(&request.logical_name) {
            Some(existing) if existing.properties == request.properties => {
                (existing.id.clone(), IntentOutcome::Unchanged)
            }
            Some(existing) => {
                existing.properties = request.properties.clone();
                (existing.id.clone(), IntentOutcome::Updated)
            }
            None => {
                let id = state.allocate_id(&request.kind, &request.logical_name);
                state.resources.insert(
                    request.logical_name.clone(),
                    StoredResource {
                        kind: request.kind.clone(),
                        properties: request.properties.clone(),
                        id: id.clone(),
                    },
                );
                (id, IntentOutcome::Created)
            }
        };
        state.record(intent, outcome);

        Ok(ResourceHandle {
            kind: request.kind.clone(),
            logical_name: request.logical_name.clone(),
            id,
        })
    }
}
