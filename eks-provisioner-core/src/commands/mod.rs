//! Commands module - provisioning operations issued through a session context

pub(crate) mod context;
mod provision_role;
mod stack;

pub use context::ProvisioningContext;
pub use provision_role::provision_role;
pub use stack::{declare_stack, resource_kind, StackOutputs};
