//! Parallel group completion strategies.

use std::collections::HashSet;

use approvalflow_protocols::{CompletionStrategy, Task, TaskStatus, WorkflowDefinition};

/// Whether a group with `strategy` is satisfied by its member task statuses.
///
/// A group with no member tasks is never satisfied.
pub fn is_group_satisfied(strategy: CompletionStrategy, statuses: &[TaskStatus]) -> bool {
    let total = statuses.len();
    if total == 0 {
        return false;
    }
    let succeeded = statuses.iter().filter(|s| s.is_successful()).count();

    match strategy {
        CompletionStrategy::AllComplete => succeeded == total,
        CompletionStrategy::AnyComplete => succeeded >= 1,
        CompletionStrategy::Majority => succeeded * 2 > total,
        CompletionStrategy::Custom(required) => succeeded >= required as usize,
    }
}

/// Names of the groups of `definition` satisfied by `tasks`.
///
/// Escalation tasks are not group members.
pub fn satisfied_groups<'a>(
    definition: &WorkflowDefinition,
    tasks: impl IntoIterator<Item = &'a Task>,
) -> HashSet<String> {
    let tasks: Vec<&Task> = tasks.into_iter().filter(|t| !t.escalation).collect();

    definition
        .active_groups()
        .into_iter()
        .filter(|group| {
            let members = definition.group_members(&group.name);
            let statuses: Vec<TaskStatus> = tasks
                .iter()
                .filter(|t| members.contains(&t.step_order))
                .map(|t| t.status)
                .collect();
            is_group_satisfied(group.strategy, &statuses)
        })
        .map(|group| group.name.clone())
        .collect()
}
