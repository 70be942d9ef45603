//! Dependency resolution over a consistent view of one instance.
//!
//! A parent is satisfied when it finished successfully, or when the parallel
//! group it belongs to is satisfied by its completion strategy. A dependent
//! is ready only when every parent is satisfied; a rejected parent leaves it
//! blocked.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use approvalflow_protocols::{
    EngineResult, Task, TaskDependency, TaskStatus, TaskStore, WorkflowDefinition,
};

use crate::parallel::satisfied_groups;

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;

/// Outcome of resolving one task against its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Blocked,
}

impl Readiness {
    /// Task status matching this readiness.
    pub fn status(&self) -> TaskStatus {
        match self {
            Readiness::Ready => TaskStatus::Ready,
            Readiness::Blocked => TaskStatus::Blocked,
        }
    }
}

/// Tasks, edges and satisfied groups of one instance, read under its lock.
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    definition: WorkflowDefinition,
    tasks: HashMap<Uuid, Task>,
    dependencies: Vec<TaskDependency>,
    satisfied_groups: HashSet<String>,
}

impl InstanceSnapshot {
    /// Build a snapshot from already-loaded parts.
    pub fn new(
        definition: &WorkflowDefinition,
        tasks: Vec<Task>,
        dependencies: Vec<TaskDependency>,
    ) -> Self {
        let tasks: HashMap<Uuid, Task> = tasks.into_iter().map(|t| (t.id, t)).collect();
        let satisfied_groups = satisfied_groups(definition, tasks.values());
        Self {
            definition: definition.clone(),
            tasks,
            dependencies,
            satisfied_groups,
        }
    }

    /// Load tasks and edges of `instance_id` from the store.
    pub async fn load(
        store: &dyn TaskStore,
        instance_id: Uuid,
        definition: &WorkflowDefinition,
    ) -> EngineResult<Self> {
        let tasks = store.tasks_for_instance(instance_id).await?;
        let dependencies = store.dependencies_for_instance(instance_id).await?;
        Ok(Self::new(definition, tasks, dependencies))
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// All tasks, escalations included, in no particular order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn parents_of(&self, id: Uuid) -> Vec<Uuid> {
        self.dependencies
            .iter()
            .filter(|d| d.dependent == id)
            .map(|d| d.parent)
            .collect()
    }

    pub fn dependents_of(&self, id: Uuid) -> Vec<Uuid> {
        self.dependencies
            .iter()
            .filter(|d| d.parent == id)
            .map(|d| d.dependent)
            .collect()
    }

    pub fn is_group_satisfied(&self, group: &str) -> bool {
        self.satisfied_groups.contains(group)
    }

    /// Whether `parent` no longer holds back its dependents.
    pub fn parent_satisfied(&self, parent: Uuid) -> bool {
        match self.tasks.get(&parent) {
            Some(task) => {
                task.status.is_successful()
                    || task
                        .group
                        .as_deref()
                        .is_some_and(|g| self.is_group_satisfied(g))
            }
            None => false,
        }
    }

    /// Resolve `id` against its parents. A task without parents is ready.
    pub fn readiness(&self, id: Uuid) -> Readiness {
        if self.parents_of(id).into_iter().all(|p| self.parent_satisfied(p)) {
            Readiness::Ready
        } else {
            Readiness::Blocked
        }
    }

    /// Tasks sharing the parallel group `group`, escalations excluded.
    pub fn group_task_ids(&self, group: &str) -> Vec<Uuid> {
        self.tasks
            .values()
            .filter(|t| !t.escalation && t.group.as_deref() == Some(group))
            .map(|t| t.id)
            .collect()
    }

    /// Whether `task` still counts as outstanding work for the instance.
    ///
    /// Escalations are advisory, and leftover members of a satisfied group
    /// no longer hold the instance back.
    pub fn is_outstanding(&self, task: &Task) -> bool {
        task.is_open()
            && !task.escalation
            && !task
                .group
                .as_deref()
                .is_some_and(|g| self.is_group_satisfied(g))
    }

    /// Outstanding tasks, see [`is_outstanding`](Self::is_outstanding).
    pub fn open_tasks(&self) -> Vec<&Task> {
        self.tasks.values().filter(|t| self.is_outstanding(t)).collect()
    }

    /// Whether `task` no longer holds its step back: it succeeded, or its
    /// group is satisfied.
    fn is_settled(&self, task: &Task) -> bool {
        task.status.is_successful()
            || task
                .group
                .as_deref()
                .is_some_and(|g| self.is_group_satisfied(g))
    }

    /// Lowest step order that has not succeeded yet.
    ///
    /// A step with a rejected task stays unsettled, so the instance never
    /// moves past it.
    pub fn lowest_unsettled_step(&self) -> Option<u32> {
        self.tasks
            .values()
            .filter(|t| !t.escalation && !self.is_settled(t))
            .map(|t| t.step_order)
            .min()
    }

    /// Whether the finished instance succeeded: every counted task succeeded.
    ///
    /// Members of satisfied groups are judged by their group instead.
    pub fn all_succeeded(&self) -> bool {
        self.tasks
            .values()
            .filter(|t| !t.escalation)
            .all(|t| self.is_settled(t))
    }

    /// Replace a task after a successful write and refresh group state.
    pub fn replace(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
        self.satisfied_groups = satisfied_groups(&self.definition, self.tasks.values());
    }
}
