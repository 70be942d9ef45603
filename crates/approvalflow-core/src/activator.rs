//! Step activation.

use approvalflow_protocols::{Context, StepDefinition, WorkflowDefinition};
use tracing::debug;

use crate::condition::Condition;

/// Whether every active condition of `step` holds for `context`.
///
/// Conditions are evaluated highest priority first and evaluation stops at
/// the first failure.
pub fn is_step_active(step: &StepDefinition, context: &Context) -> bool {
    if !step.active {
        return false;
    }

    for condition in step.active_conditions() {
        if !Condition::parse(&condition.expression).evaluate(context) {
            debug!(
                "Step {} '{}' skipped: condition '{}' did not match",
                step.order, step.name, condition.name
            );
            return false;
        }
    }
    true
}

/// Steps of `definition` whose tasks should be materialized, in step order.
pub fn select_active_steps<'a>(
    definition: &'a WorkflowDefinition,
    context: &Context,
) -> Vec<&'a StepDefinition> {
    definition
        .steps_ordered()
        .into_iter()
        .filter(|step| is_step_active(step, context))
        .collect()
}
