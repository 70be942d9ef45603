//! Persistence protocols for tasks and instances.
//!
//! Every mutation is compare-and-transition: the write only lands when the
//! persisted status still matches what the caller observed.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::types::{InstanceStatus, Task, TaskDependency, TaskStatus, WorkflowInstance};

/// Task and task dependency persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert new tasks.
    async fn insert_tasks(&self, tasks: &[Task]) -> EngineResult<()>;

    /// Load a task by id.
    async fn get_task(&self, id: Uuid) -> EngineResult<Option<Task>>;

    /// Persist `task` only if the stored status is still `expected`.
    ///
    /// Returns `false` when another writer got there first.
    async fn transition_task(&self, task: &Task, expected: TaskStatus) -> EngineResult<bool>;

    /// All tasks of an instance.
    async fn tasks_for_instance(&self, instance_id: Uuid) -> EngineResult<Vec<Task>>;

    /// All tasks assigned to a user.
    async fn tasks_for_user(&self, username: &str) -> EngineResult<Vec<Task>>;

    /// Insert dependency edges.
    async fn insert_dependencies(&self, dependencies: &[TaskDependency]) -> EngineResult<()>;

    /// All dependency edges of an instance.
    async fn dependencies_for_instance(&self, instance_id: Uuid)
    -> EngineResult<Vec<TaskDependency>>;

    /// Edges where `parent` is the parent.
    async fn dependents_of(&self, parent: Uuid) -> EngineResult<Vec<TaskDependency>>;

    /// Edges where `dependent` is the dependent.
    async fn parents_of(&self, dependent: Uuid) -> EngineResult<Vec<TaskDependency>>;

    /// Tasks of an instance in one status.
    async fn tasks_by_status(
        &self,
        instance_id: Uuid,
        status: TaskStatus,
    ) -> EngineResult<Vec<Task>> {
        Ok(self
            .tasks_for_instance(instance_id)
            .await?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    /// Open tasks of an instance whose parents are all successful.
    async fn ready_tasks(&self, instance_id: Uuid) -> EngineResult<Vec<Task>> {
        Ok(self.partition_by_parents(instance_id).await?.0)
    }

    /// Open tasks of an instance with at least one unsuccessful parent.
    async fn blocked_tasks(&self, instance_id: Uuid) -> EngineResult<Vec<Task>> {
        Ok(self.partition_by_parents(instance_id).await?.1)
    }

    /// Split open tasks into (all parents successful, some parent not).
    async fn partition_by_parents(&self, instance_id: Uuid) -> EngineResult<(Vec<Task>, Vec<Task>)> {
        let tasks = self.tasks_for_instance(instance_id).await?;
        let dependencies = self.dependencies_for_instance(instance_id).await?;
        let status: HashMap<Uuid, TaskStatus> = tasks.iter().map(|t| (t.id, t.status)).collect();

        let (ready, blocked): (Vec<Task>, Vec<Task>) = tasks.into_iter().filter(|t| t.is_open()).partition(|t| {
            dependencies
                .iter()
                .filter(|d| d.dependent == t.id)
                .all(|d| status.get(&d.parent).is_some_and(|s| s.is_successful()))
        });
        Ok((ready, blocked))
    }
}

/// Workflow instance persistence.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert a new instance.
    ///
    /// Fails with `AlreadyExists` if the entity already has a non-terminal
    /// instance. The check and the insert are atomic.
    async fn insert_instance(&self, instance: &WorkflowInstance) -> EngineResult<()>;

    /// Load an instance by id.
    async fn get_instance(&self, id: Uuid) -> EngineResult<Option<WorkflowInstance>>;

    /// Persist `instance` only if the stored status is still `expected`.
    async fn transition_instance(
        &self,
        instance: &WorkflowInstance,
        expected: InstanceStatus,
    ) -> EngineResult<bool>;

    /// The non-terminal instance for an entity, if any.
    async fn find_active_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> EngineResult<Option<WorkflowInstance>>;

    /// Instances filtered by workflow id and status.
    async fn list_instances(
        &self,
        workflow_id: Option<&str>,
        status: Option<InstanceStatus>,
    ) -> EngineResult<Vec<WorkflowInstance>>;
}
