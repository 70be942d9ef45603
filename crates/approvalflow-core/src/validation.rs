//! Workflow definition validation.
//!
//! Structural problems are `Configuration` errors and prevent an instance
//! from being created. Questionable but runnable shapes are warnings.

use std::collections::HashSet;

use tracing::warn;

use approvalflow_protocols::{
    CompletionStrategy, EngineError, EngineResult, TimeoutAction, UserDirectory,
    WorkflowDefinition,
};

use crate::generator::plan_step_graph;

#[cfg(test)]
#[path = "validation_tests.rs"]
mod tests;

/// Non-fatal findings for a valid definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionReport {
    pub warnings: Vec<String>,
}

impl DefinitionReport {
    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

fn invalid(definition: &WorkflowDefinition, message: impl std::fmt::Display) -> EngineError {
    EngineError::Configuration(format!("workflow '{}': {}", definition.name, message))
}

/// Check `definition` for structural errors.
pub fn validate_definition(definition: &WorkflowDefinition) -> EngineResult<DefinitionReport> {
    let mut report = DefinitionReport::default();
    let steps = definition.steps_ordered();

    if steps.is_empty() {
        return Err(invalid(definition, "workflow has no active steps"));
    }

    let mut orders: Vec<u32> = definition.steps.iter().map(|s| s.order).collect();
    orders.sort_unstable();
    for (index, order) in orders.iter().enumerate() {
        let expected = index as u32 + 1;
        if *order != expected {
            return Err(invalid(
                definition,
                format!("step orders must be 1..{} without gaps or duplicates, found {:?}", orders.len(), orders),
            ));
        }
    }
    let known: HashSet<u32> = orders.iter().copied().collect();

    for step in &steps {
        if step.assigned_role.trim().is_empty() {
            return Err(invalid(
                definition,
                format!("step {} '{}' has no assigned role", step.order, step.name),
            ));
        }
        if let Some(group) = &step.group {
            if !definition.groups.iter().any(|g| &g.name == group) {
                return Err(invalid(
                    definition,
                    format!("step {} references unknown group '{}'", step.order, group),
                ));
            }
        }
        if let Some(parents) = &step.depends_on {
            for parent in parents {
                if !known.contains(parent) {
                    return Err(invalid(
                        definition,
                        format!("step {} depends on unknown step {}", step.order, parent),
                    ));
                }
            }
        }
        if step.parallel && definition.group_for_step(step.order).is_none() {
            report.warn(format!(
                "step {} '{}' is marked parallel but belongs to no active group",
                step.order, step.name
            ));
        }
    }

    for group in definition.active_groups() {
        if let Some(unknown) = group.steps.iter().find(|s| !known.contains(s)) {
            return Err(invalid(
                definition,
                format!("group '{}' lists unknown step {}", group.name, unknown),
            ));
        }
        if group.strategy == CompletionStrategy::Custom(0) {
            return Err(invalid(
                definition,
                format!("group '{}' uses CUSTOM(0), which is always satisfied", group.name),
            ));
        }

        let members = definition.group_members(&group.name);
        match members.len() {
            0 => report.warn(format!("group '{}' has no active steps", group.name)),
            1 => report.warn(format!("group '{}' has a single step", group.name)),
            _ => {}
        }
        if members.windows(2).any(|w| w[1] != w[0] + 1) {
            report.warn(format!(
                "group '{}' has non-consecutive steps {:?}",
                group.name, members
            ));
        }
        if let CompletionStrategy::Custom(required) = group.strategy {
            if required as usize > members.len() {
                report.warn(format!(
                    "group '{}' requires {} completions but has {} steps",
                    group.name,
                    required,
                    members.len()
                ));
            }
        }
    }

    plan_step_graph(definition, &steps).map_err(|e| invalid(definition, e))?;

    for timeout in &definition.timeouts {
        if !known.contains(&timeout.step) {
            return Err(invalid(
                definition,
                format!("timeout '{}' targets unknown step {}", timeout.id, timeout.step),
            ));
        }
        if let TimeoutAction::Escalate { role } = &timeout.action {
            if role.trim().is_empty() {
                return Err(invalid(
                    definition,
                    format!("timeout '{}' escalates to an empty role", timeout.id),
                ));
            }
        }
    }

    Ok(report)
}

/// [`validate_definition`] plus a warning for every role without users.
pub async fn validate_with_directory(
    definition: &WorkflowDefinition,
    directory: &dyn UserDirectory,
) -> EngineResult<DefinitionReport> {
    let mut report = validate_definition(definition)?;

    let mut seen = HashSet::new();
    for step in definition.steps_ordered() {
        if !seen.insert(step.assigned_role.as_str()) {
            continue;
        }
        if directory.find_users_by_role(&step.assigned_role).await?.is_empty() {
            warn!(
                "Role '{}' of workflow '{}' has no users",
                step.assigned_role, definition.name
            );
            report.warn(format!(
                "role '{}' (step {}) has no users; the step will be skipped",
                step.assigned_role, step.order
            ));
        }
    }

    Ok(report)
}
