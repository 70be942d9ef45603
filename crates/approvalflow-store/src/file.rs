//! File-based task and instance store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use approvalflow_protocols::{
    EngineError, EngineResult, InstanceStatus, InstanceStore, Task, TaskDependency, TaskStatus,
    TaskStore, WorkflowInstance,
};

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;

/// File system store.
///
/// Records are individual JSON files organized by status:
/// ```text
/// {storage_path}/
/// ├── instances/
/// │   ├── pending/{uuid}.json
/// │   ├── in_progress/{uuid}.json
/// │   └── completed/ rejected/ cancelled/
/// ├── tasks/
/// │   ├── pending/{uuid}.json
/// │   └── blocked/ ready/ in_progress/ completed/ approved/ rejected/ cancelled/
/// └── dependencies/
///     └── {instance uuid}.json
/// ```
///
/// Every file is written to `{name}.json.tmp` and renamed into place, so a
/// reader never sees a partial record. A status change writes the new copy
/// before removing the old one; if a crash leaves both, the copy with the
/// newest `updated_at` wins and the stale one is removed on the next write.
///
/// Reads and writes are serialized by one process-local mutex, which makes
/// the compare-and-transition and the duplicate-instance check atomic within
/// a process and keeps readers from observing a record mid-move.
pub struct FileStore {
    storage_path: PathBuf,
    lock: Mutex<()>,
}

fn db_error(context: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Store(format!("{}: {}", context, e))
}

impl FileStore {
    /// Open a store, creating its directory tree.
    pub async fn new(storage_path: impl Into<PathBuf>) -> EngineResult<Self> {
        let storage_path = storage_path.into();

        for status in InstanceStatus::ALL {
            let dir = storage_path.join("instances").join(status.as_str());
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| db_error(&format!("Failed to create {:?}", dir), e))?;
        }
        for status in TaskStatus::ALL {
            let dir = storage_path.join("tasks").join(status.as_str());
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| db_error(&format!("Failed to create {:?}", dir), e))?;
        }
        let dir = storage_path.join("dependencies");
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| db_error(&format!("Failed to create {:?}", dir), e))?;

        debug!("FileStore initialized at {:?}", storage_path);
        Ok(Self {
            storage_path,
            lock: Mutex::new(()),
        })
    }

    fn task_path(&self, id: &Uuid, status: TaskStatus) -> PathBuf {
        self.storage_path
            .join("tasks")
            .join(status.as_str())
            .join(format!("{}.json", id))
    }

    fn instance_path(&self, id: &Uuid, status: InstanceStatus) -> PathBuf {
        self.storage_path
            .join("instances")
            .join(status.as_str())
            .join(format!("{}.json", id))
    }

    fn dependencies_path(&self, instance_id: &Uuid) -> PathBuf {
        self.storage_path
            .join("dependencies")
            .join(format!("{}.json", instance_id))
    }

    fn task_files(&self, id: &Uuid) -> Vec<PathBuf> {
        TaskStatus::ALL
            .into_iter()
            .map(|status| self.task_path(id, status))
            .filter(|path| path.exists())
            .collect()
    }

    fn instance_files(&self, id: &Uuid) -> Vec<PathBuf> {
        InstanceStatus::ALL
            .into_iter()
            .map(|status| self.instance_path(id, status))
            .filter(|path| path.exists())
            .collect()
    }

    /// Newest of the copies at `paths`.
    async fn read_newest<T: DeserializeOwned>(
        paths: &[PathBuf],
        updated_at: impl Fn(&T) -> DateTime<Utc>,
    ) -> EngineResult<Option<T>> {
        let mut newest: Option<T> = None;
        for path in paths {
            let record: T = Self::read_json(path).await?;
            if newest.as_ref().is_none_or(|n| updated_at(&record) > updated_at(n)) {
                newest = Some(record);
            }
        }
        Ok(newest)
    }

    async fn load_task(&self, id: &Uuid) -> EngineResult<Option<Task>> {
        Self::read_newest(&self.task_files(id), |t: &Task| t.updated_at).await
    }

    async fn load_instance(&self, id: &Uuid) -> EngineResult<Option<WorkflowInstance>> {
        Self::read_newest(&self.instance_files(id), |i: &WorkflowInstance| i.updated_at).await
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> EngineResult<T> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| db_error(&format!("Failed to read {:?}", path), e))?;
        serde_json::from_str(&content)
            .map_err(|e| db_error(&format!("Failed to deserialize {:?}", path), e))
    }

    /// Write through a temp file and rename it over `path`.
    async fn write_json<T: Serialize>(path: &Path, value: &T) -> EngineResult<()> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| db_error("Failed to serialize record", e))?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)
            .await
            .map_err(|e| db_error(&format!("Failed to write {:?}", temp_path), e))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| db_error(&format!("Failed to rename {:?}", temp_path), e))
    }

    /// Remove copies of a record other than `keep`.
    async fn remove_stale(paths: Vec<PathBuf>, keep: &Path) {
        for path in paths.into_iter().filter(|p| p != keep) {
            if let Err(e) = fs::remove_file(&path).await {
                warn!("Failed to remove stale copy {:?}: {}", path, e);
            }
        }
    }

    /// Every readable JSON record in `dir`. Unreadable files are skipped.
    async fn read_dir_json<T: DeserializeOwned>(dir: &Path) -> EngineResult<Vec<T>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| db_error(&format!("Failed to read {:?}", dir), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| db_error("Failed to read directory entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match Self::read_json(&path).await {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping {:?}: {}", path, e),
                }
            }
        }
        Ok(records)
    }

    /// Every task, keeping the newest copy of any duplicated record.
    async fn all_tasks(&self) -> EngineResult<Vec<Task>> {
        let mut tasks: HashMap<Uuid, Task> = HashMap::new();
        for status in TaskStatus::ALL {
            let dir = self.storage_path.join("tasks").join(status.as_str());
            for task in Self::read_dir_json::<Task>(&dir).await? {
                match tasks.get(&task.id) {
                    Some(existing) if existing.updated_at >= task.updated_at => {}
                    _ => {
                        tasks.insert(task.id, task);
                    }
                }
            }
        }
        Ok(tasks.into_values().collect())
    }

    /// Instances whose newest copy has `status`.
    async fn instances_in(&self, status: InstanceStatus) -> EngineResult<Vec<WorkflowInstance>> {
        let dir = self.storage_path.join("instances").join(status.as_str());
        let mut instances = Vec::new();
        for candidate in Self::read_dir_json::<WorkflowInstance>(&dir).await? {
            if self.instance_files(&candidate.id).len() > 1 {
                match self.load_instance(&candidate.id).await? {
                    Some(newest) if newest.status == status => instances.push(newest),
                    _ => {}
                }
            } else {
                instances.push(candidate);
            }
        }
        Ok(instances)
    }

    async fn load_dependencies(&self, instance_id: &Uuid) -> EngineResult<Vec<TaskDependency>> {
        let path = self.dependencies_path(instance_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Self::read_json(&path).await
    }

    /// Edges of the instance owning `task_id`, or every edge for an unknown task.
    async fn edges_around(&self, task_id: Uuid) -> EngineResult<Vec<TaskDependency>> {
        match self.load_task(&task_id).await? {
            Some(task) => self.load_dependencies(&task.instance_id).await,
            None => self.all_dependencies().await,
        }
    }

    async fn all_dependencies(&self) -> EngineResult<Vec<TaskDependency>> {
        let batches: Vec<Vec<TaskDependency>> =
            Self::read_dir_json(&self.storage_path.join("dependencies")).await?;
        Ok(batches.into_iter().flatten().collect())
    }

    /// Write a task to its status directory, then remove older copies.
    async fn save_task(&self, task: &Task) -> EngineResult<()> {
        let path = self.task_path(&task.id, task.status);
        Self::write_json(&path, task).await?;
        Self::remove_stale(self.task_files(&task.id), &path).await;
        debug!("Saved task {} to {:?}", task.id, path);
        Ok(())
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> EngineResult<()> {
        let path = self.instance_path(&instance.id, instance.status);
        Self::write_json(&path, instance).await?;
        Self::remove_stale(self.instance_files(&instance.id), &path).await;
        debug!("Saved instance {} to {:?}", instance.id, path);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileStore {
    async fn insert_tasks(&self, tasks: &[Task]) -> EngineResult<()> {
        let _guard = self.lock.lock().await;
        for task in tasks {
            self.save_task(task).await?;
        }
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> EngineResult<Option<Task>> {
        let _guard = self.lock.lock().await;
        self.load_task(&id).await
    }

    async fn transition_task(&self, task: &Task, expected: TaskStatus) -> EngineResult<bool> {
        let _guard = self.lock.lock().await;
        match self.load_task(&task.id).await? {
            Some(current) if current.status == expected => {
                self.save_task(task).await?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::TaskNotFound(task.id)),
        }
    }

    async fn tasks_for_instance(&self, instance_id: Uuid) -> EngineResult<Vec<Task>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .all_tasks()
            .await?
            .into_iter()
            .filter(|t| t.instance_id == instance_id)
            .collect())
    }

    async fn tasks_for_user(&self, username: &str) -> EngineResult<Vec<Task>> {
        let _guard = self.lock.lock().await;
        let mut tasks: Vec<Task> = self
            .all_tasks()
            .await?
            .into_iter()
            .filter(|t| t.assigned_to == username)
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn insert_dependencies(&self, dependencies: &[TaskDependency]) -> EngineResult<()> {
        let _guard = self.lock.lock().await;

        let mut instance_ids: Vec<Uuid> = dependencies.iter().map(|d| d.instance_id).collect();
        instance_ids.sort_unstable();
        instance_ids.dedup();

        for instance_id in instance_ids {
            let path = self.dependencies_path(&instance_id);
            let mut stored: Vec<TaskDependency> = if path.exists() {
                Self::read_json(&path).await?
            } else {
                Vec::new()
            };
            stored.extend(
                dependencies
                    .iter()
                    .filter(|d| d.instance_id == instance_id)
                    .cloned(),
            );
            Self::write_json(&path, &stored).await?;
        }
        Ok(())
    }

    async fn dependencies_for_instance(
        &self,
        instance_id: Uuid,
    ) -> EngineResult<Vec<TaskDependency>> {
        let _guard = self.lock.lock().await;
        self.load_dependencies(&instance_id).await
    }

    async fn dependents_of(&self, parent: Uuid) -> EngineResult<Vec<TaskDependency>> {
        let _guard = self.lock.lock().await;
        let edges = self.edges_around(parent).await?;
        Ok(edges.into_iter().filter(|d| d.parent == parent).collect())
    }

    async fn parents_of(&self, dependent: Uuid) -> EngineResult<Vec<TaskDependency>> {
        let _guard = self.lock.lock().await;
        let edges = self.edges_around(dependent).await?;
        Ok(edges.into_iter().filter(|d| d.dependent == dependent).collect())
    }
}

#[async_trait]
impl InstanceStore for FileStore {
    async fn insert_instance(&self, instance: &WorkflowInstance) -> EngineResult<()> {
        let _guard = self.lock.lock().await;

        for status in [InstanceStatus::Pending, InstanceStatus::InProgress] {
            let active = self.instances_in(status).await?;
            if active
                .iter()
                .any(|i| i.is_for_entity(&instance.entity_type, &instance.entity_id))
            {
                return Err(EngineError::AlreadyExists {
                    entity_type: instance.entity_type.clone(),
                    entity_id: instance.entity_id.clone(),
                });
            }
        }
        self.save_instance(instance).await
    }

    async fn get_instance(&self, id: Uuid) -> EngineResult<Option<WorkflowInstance>> {
        let _guard = self.lock.lock().await;
        self.load_instance(&id).await
    }

    async fn transition_instance(
        &self,
        instance: &WorkflowInstance,
        expected: InstanceStatus,
    ) -> EngineResult<bool> {
        let _guard = self.lock.lock().await;
        match self.load_instance(&instance.id).await? {
            Some(current) if current.status == expected => {
                self.save_instance(instance).await?;
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
        let _guard = self.lock.lock().await;
        for status in [InstanceStatus::Pending, InstanceStatus::InProgress] {
            if let Some(found) = self
                .instances_in(status)
                .await?
                .into_iter()
                .find(|i| i.is_for_entity(entity_type, entity_id))
            {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn list_instances(
        &self,
        workflow_id: Option<&str>,
        status: Option<InstanceStatus>,
    ) -> EngineResult<Vec<WorkflowInstance>> {
        let _guard = self.lock.lock().await;
        let statuses: Vec<InstanceStatus> = match status {
            Some(status) => vec![status],
            None => InstanceStatus::ALL.to_vec(),
        };

        let mut instances = Vec::new();
        for status in statuses {
            instances.extend(
                self.instances_in(status)
                    .await?
                    .into_iter()
                    .filter(|i| workflow_id.is_none_or(|w| i.workflow_id == w)),
            );
        }
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }
}
