//! In-memory task and instance store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use approvalflow_protocols::{
    EngineError, EngineResult, InstanceStatus, InstanceStore, Task, TaskDependency, TaskStatus,
    TaskStore, WorkflowInstance,
};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// In-memory store for tests and single-process deployments.
pub struct MemoryStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    dependencies: RwLock<Vec<TaskDependency>>,
    instances: RwLock<HashMap<Uuid, WorkflowInstance>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            dependencies: RwLock::new(Vec::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_tasks(&self, tasks: &[Task]) -> EngineResult<()> {
        let mut stored = self.tasks.write().await;
        for task in tasks {
            stored.insert(task.id, task.clone());
        }
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> EngineResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn transition_task(&self, task: &Task, expected: TaskStatus) -> EngineResult<bool> {
        let mut stored = self.tasks.write().await;
        match stored.get_mut(&task.id) {
            Some(current) if current.status == expected => {
                *current = task.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::TaskNotFound(task.id)),
        }
    }

    async fn tasks_for_instance(&self, instance_id: Uuid) -> EngineResult<Vec<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn tasks_for_user(&self, username: &str) -> EngineResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.assigned_to == username)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn insert_dependencies(&self, dependencies: &[TaskDependency]) -> EngineResult<()> {
        self.dependencies
            .write()
            .await
            .extend(dependencies.iter().cloned());
        Ok(())
    }

    async fn dependencies_for_instance(
        &self,
        instance_id: Uuid,
    ) -> EngineResult<Vec<TaskDependency>> {
        Ok(self
            .dependencies
            .read()
            .await
            .iter()
            .filter(|d| d.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn dependents_of(&self, parent: Uuid) -> EngineResult<Vec<TaskDependency>> {
        Ok(self
            .dependencies
            .read()
            .await
            .iter()
            .filter(|d| d.parent == parent)
            .cloned()
            .collect())
    }

    async fn parents_of(&self, dependent: Uuid) -> EngineResult<Vec<TaskDependency>> {
        Ok(self
            .dependencies
            .read()
            .await
            .iter()
            .filter(|d| d.dependent == dependent)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn insert_instance(&self, instance: &WorkflowInstance) -> EngineResult<()> {
        let mut instances = self.instances.write().await;
        let duplicate = instances.values().any(|i| {
            !i.is_terminal() && i.is_for_entity(&instance.entity_type, &instance.entity_id)
        });
        if duplicate {
            return Err(EngineError::AlreadyExists {
                entity_type: instance.entity_type.clone(),
                entity_id: instance.entity_id.clone(),
            });
        }
        instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> EngineResult<Option<WorkflowInstance>> {
        Ok(self.instances.read().await.get(&id).cloned())
    }

    async fn transition_instance(
        &self,
        instance: &WorkflowInstance,
        expected: InstanceStatus,
    ) -> EngineResult<bool> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(&instance.id) {
            Some(current) if current.status == expected => {
                *current = instance.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::InstanceNotFound(instance.id)),
        }
    }

    async fn find_active_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> EngineResult<Option<WorkflowInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .find(|i| !i.is_terminal() && i.is_for_entity(entity_type, entity_id))
            .cloned())
    }

    async fn list_instances(
        &self,
        workflow_id: Option<&str>,
        status: Option<InstanceStatus>,
    ) -> EngineResult<Vec<WorkflowInstance>> {
        let mut instances: Vec<WorkflowInstance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| workflow_id.is_none_or(|w| i.workflow_id == w))
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }
}
