//! Plan rendering

use std::fmt::Write;

use eks_provisioner_core::{Intent, IntentOutcome, IntentRecord, StackOutputs};
use serde::Serialize;

#[derive(Serialize)]
struct PlanReport<'a> {
    intents: &'a [IntentRecord],
    outputs: &'a StackOutputs,
}

fn outcome_marker(outcome: IntentOutcome) -> char {
    match outcome {
        IntentOutcome::Created => '+',
        IntentOutcome::Updated => '~',
        IntentOutcome::Unchanged => '=',
        IntentOutcome::Failed => '!',
    }
}

pub fn render_plan_text(intents: &[IntentRecord], outputs: &StackOutputs) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Plan ({} intents):", intents.len());
    for record in intents {
        let marker = outcome_marker(record.outcome);
        let _ = match &record.intent {
            Intent::EnsureRole { name } => writeln!(out, "  {marker} role {name}"),
            Intent::EnsureRolePolicyAttachment {
                role_name,
                policy_arn,
            } => writeln!(out, "  {marker} attach {policy_arn} -> {role_name}"),
            Intent::EnsureResource { kind, logical_name } => {
                writeln!(out, "  {marker} {kind} {logical_name}")
            }
        };
    }
    let _ = writeln!(
        out,
        "Role: {} ({})",
        outputs.role.name(),
        outputs.role.arn()
    );
    let _ = writeln!(
        out,
        "Cluster: {} in {} subnets",
        outputs.cluster.logical_name,
        outputs.subnets.len()
    );
    out
}

pub fn render_plan_json(
    intents: &[IntentRecord],
    outputs: &StackOutputs,
) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&PlanReport { intents, outputs })
}
