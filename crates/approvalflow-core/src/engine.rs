//! Workflow engine: the public operations of the execution core.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use approvalflow_config::{EngineConfig, FrontierMode};
use approvalflow_protocols::{
    Context, DefinitionStore, EngineError, EngineResult, EventKind, EventPublisher, InstanceStatus,
    InstanceStore, Notifier, Task, TaskCounts, TaskStatus, TaskStore, UserDirectory,
    WorkflowEvent, WorkflowInstance, WorkflowStatusReport,
};

use crate::activator::select_active_steps;
use crate::cascade::{CascadeEngine, CascadeOutcome, EngineContext};
use crate::effects::Effects;
use crate::generator::{GeneratedTasks, TaskGenerator};
use crate::locks::InstanceLocks;
use crate::resolver::{InstanceSnapshot, Readiness};
use crate::state::InstanceStateMachine;
use crate::validation::validate_definition;

/// External collaborators of the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub definitions: Arc<dyn DefinitionStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub tasks: Arc<dyn TaskStore>,
    pub instances: Arc<dyn InstanceStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub notifier: Arc<dyn Notifier>,
}

/// Drives workflow instances from start to a terminal state.
pub struct WorkflowEngine {
    pub(crate) ctx: Arc<EngineContext>,
    cascade: CascadeEngine,
    generator: TaskGenerator,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let generator = TaskGenerator::new(collaborators.directory.clone(), &config);
        let ctx = Arc::new(EngineContext {
            definitions: collaborators.definitions,
            directory: collaborators.directory,
            tasks: collaborators.tasks,
            instances: collaborators.instances,
            effects: Effects::new(collaborators.publisher, collaborators.notifier),
            locks: InstanceLocks::new(),
            config,
        });
        Self {
            cascade: CascadeEngine::new(ctx.clone()),
            ctx,
            generator,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Cascade handle for the asynchronous event path.
    pub fn cascade_engine(&self) -> CascadeEngine {
        self.cascade.clone()
    }

    /// Run the cascade for a task that reached a terminal status.
    pub async fn cascade(&self, task_id: Uuid) -> EngineResult<CascadeOutcome> {
        self.cascade.on_task_terminal(task_id).await
    }

    /// Start `workflow_name` for an entity.
    ///
    /// Fails with `AlreadyExists` when the entity has a non-terminal instance
    /// and with `Configuration` when the definition cannot run.
    pub async fn start_workflow(
        &self,
        entity_type: &str,
        entity_id: &str,
        workflow_name: &str,
        started_by: &str,
        context: Context,
    ) -> EngineResult<WorkflowInstance> {
        let ctx = &self.ctx;
        let definition = ctx
            .definitions
            .get_workflow_by_name(workflow_name)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_name.to_string()))?;

        if !definition.active {
            return Err(EngineError::Configuration(format!(
                "workflow '{}' is not active",
                definition.name
            )));
        }
        if !definition.accepts_entity_type(entity_type) {
            return Err(EngineError::Configuration(format!(
                "workflow '{}' runs on entity type '{}', not '{}'",
                definition.name, definition.entity_type, entity_type
            )));
        }
        let report = validate_definition(&definition)?;
        for warning in &report.warnings {
            warn!("Workflow '{}': {}", definition.name, warning);
        }

        if ctx
            .instances
            .find_active_for_entity(entity_type, entity_id)
            .await?
            .is_some()
        {
            return Err(EngineError::AlreadyExists {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
            });
        }

        let mut context = context;
        context
            .entry("entityType".to_string())
            .or_insert_with(|| json!(entity_type));
        context
            .entry("entityId".to_string())
            .or_insert_with(|| json!(entity_id));
        context
            .entry("startedBy".to_string())
            .or_insert_with(|| json!(started_by));

        let steps = select_active_steps(&definition, &context);
        let mut instance = WorkflowInstance::new(
            &definition.id,
            &definition.name,
            entity_type,
            entity_id,
            started_by,
        )
        .with_context(context);
        instance.total_steps = definition.total_steps();

        let guard = ctx.locks.lock(instance.id).await;
        ctx.instances.insert_instance(&instance).await?;

        let generated = match self.generator.generate(&instance, &definition, &steps).await {
            Ok(generated) => generated,
            Err(e) => {
                self.abandon(&mut instance, &e).await;
                return Err(e);
            }
        };
        let first_step = generated.first_step();
        let GeneratedTasks {
            mut tasks,
            dependencies,
            skipped_steps,
        } = generated;

        let has_parent: HashSet<Uuid> = dependencies.iter().map(|d| d.dependent).collect();
        for task in tasks.iter_mut() {
            if !has_parent.contains(&task.id) {
                task.status = TaskStatus::Ready;
            } else if ctx.config.frontier == FrontierMode::Full {
                task.status = TaskStatus::Blocked;
            }
        }

        let persisted = async {
            ctx.tasks.insert_tasks(&tasks).await?;
            ctx.tasks.insert_dependencies(&dependencies).await
        }
        .await;
        if let Err(e) = persisted {
            self.abandon(&mut instance, &e).await;
            return Err(e);
        }

        InstanceStateMachine::transition(&mut instance, InstanceStatus::InProgress, None)?;
        let mut completed_message = None;
        match first_step {
            Some(step) => {
                InstanceStateMachine::advance_step(&mut instance, step);
            }
            None => {
                warn!(
                    "Workflow instance {} produced no tasks, completing immediately",
                    instance.id
                );
                let total = instance.total_steps;
                InstanceStateMachine::advance_step(&mut instance, total);
                InstanceStateMachine::transition(&mut instance, InstanceStatus::Completed, None)?;
                completed_message = Some(format!(
                    "Workflow '{}' completed for {} {}",
                    instance.workflow_name, instance.entity_type, instance.entity_id
                ));
            }
        }

        if !ctx
            .instances
            .transition_instance(&instance, InstanceStatus::Pending)
            .await?
        {
            return Err(EngineError::InvalidState(format!(
                "instance {} changed while starting",
                instance.id
            )));
        }
        drop(guard);

        info!(
            "Started workflow '{}' instance {} for {} {} with {} tasks ({} steps skipped)",
            instance.workflow_name,
            instance.id,
            entity_type,
            entity_id,
            tasks.len(),
            skipped_steps.len()
        );

        let mut events = vec![WorkflowEvent::for_instance(
            EventKind::WorkflowStarted,
            &instance,
            started_by,
            format!(
                "Workflow '{}' started for {} {}",
                instance.workflow_name, entity_type, entity_id
            ),
        )
        .with_metadata("totalSteps", json!(instance.total_steps))
        .with_metadata("skippedSteps", json!(skipped_steps))];
        for task in &tasks {
            events.push(
                WorkflowEvent::for_task(
                    EventKind::TaskCreated,
                    &instance,
                    task,
                    &ctx.config.system_actor,
                    format!("Task '{}' created for {}", task.title, task.assigned_to),
                )
                .with_metadata("stepOrder", json!(task.step_order))
                .with_metadata("assignedTo", json!(task.assigned_to)),
            );
        }
        if let Some(message) = &completed_message {
            events.push(WorkflowEvent::for_instance(
                EventKind::WorkflowCompleted,
                &instance,
                &ctx.config.system_actor,
                message,
            ));
        }
        ctx.effects.publish_all(events).await;

        for task in tasks.iter().filter(|t| t.status == TaskStatus::Ready) {
            ctx.effects
                .notify_task(
                    task,
                    "READY",
                    &format!("Task '{}' has been assigned to you", task.title),
                )
                .await;
        }
        if let Some(message) = completed_message {
            ctx.announce_finished(&instance, &message).await;
            ctx.locks.forget(instance.id);
        }

        Ok(instance)
    }

    /// Cancel an instance whose start failed after it was inserted.
    async fn abandon(&self, instance: &mut WorkflowInstance, cause: &EngineError) {
        let reason = format!("Start failed: {}", cause);
        if let Err(e) =
            InstanceStateMachine::transition(instance, InstanceStatus::Cancelled, Some(&reason))
        {
            error!("Failed to abandon instance {}: {}", instance.id, e);
            return;
        }
        match self
            .ctx
            .instances
            .transition_instance(instance, InstanceStatus::Pending)
            .await
        {
            Ok(true) => warn!("Abandoned workflow instance {}: {}", instance.id, reason),
            Ok(false) => warn!("Instance {} changed before it could be abandoned", instance.id),
            Err(e) => error!("Failed to abandon instance {}: {}", instance.id, e),
        }
    }

    /// Move a READY task to IN_PROGRESS.
    pub async fn start_task(&self, task_id: Uuid, actor: &str) -> EngineResult<Task> {
        let ctx = &self.ctx;
        let instance_id = ctx.require_task(task_id).await?.instance_id;
        let _guard = ctx.locks.lock(instance_id).await;

        let mut task = ctx.require_task(task_id).await?;
        if task.status != TaskStatus::Ready {
            return Err(EngineError::invalid_transition(
                task.status,
                TaskStatus::InProgress,
            ));
        }
        task.apply_status(TaskStatus::InProgress, actor);
        if !ctx.tasks.transition_task(&task, TaskStatus::Ready).await? {
            let current = ctx.require_task(task_id).await?;
            return Err(EngineError::invalid_transition(
                current.status,
                TaskStatus::InProgress,
            ));
        }

        info!("Task {} started by {}", task_id, actor);
        Ok(task)
    }

    /// Record a terminal outcome for a task and cascade it.
    ///
    /// An already-terminal task fails with `InvalidTransition`. Cascade
    /// failures are logged; the event path retries them.
    pub async fn report_task_terminal(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        comments: Option<String>,
        actor: &str,
    ) -> EngineResult<Task> {
        let ctx = &self.ctx;
        let instance_id = ctx.require_task(task_id).await?.instance_id;
        let guard = ctx.locks.lock(instance_id).await;

        let mut task = ctx.require_task(task_id).await?;
        let previous = task.status;
        if !status.is_terminal() || !previous.can_transition_to(status) {
            return Err(EngineError::invalid_transition(previous, status));
        }

        task.apply_status(status, actor);
        if let Some(comments) = comments {
            if status == TaskStatus::Rejected {
                task.rejection_reason = Some(comments);
            } else {
                task.comments = Some(comments);
            }
        }
        if !ctx.tasks.transition_task(&task, previous).await? {
            let current = ctx.require_task(task_id).await?;
            return Err(EngineError::invalid_transition(current.status, status));
        }
        let instance = ctx.require_instance(instance_id).await?;
        drop(guard);

        info!("Task {} {} by {}", task_id, status, actor);

        let message = format!("Task '{}' {} by {}", task.title, status, actor);
        let (task_kind, approval_kind) = match status {
            TaskStatus::Rejected => (EventKind::TaskRejected, Some(EventKind::ApprovalDenied)),
            TaskStatus::Cancelled => (EventKind::TaskCancelled, None),
            _ => (EventKind::TaskCompleted, Some(EventKind::ApprovalGranted)),
        };
        let mut task_event =
            WorkflowEvent::for_task(task_kind, &instance, &task, actor, &message)
                .with_metadata("stepOrder", json!(task.step_order));
        if let Some(comments) = task.comments.as_ref().or(task.rejection_reason.as_ref()) {
            task_event = task_event.with_metadata("comments", json!(comments));
        }
        ctx.effects.publish(task_event).await;
        if let Some(kind) = approval_kind {
            ctx.effects
                .publish(WorkflowEvent::for_task(kind, &instance, &task, actor, &message))
                .await;
        }
        ctx.effects
            .notify_task(&task, &status.to_string(), &message)
            .await;

        if let Err(e) = self.cascade.on_task_terminal(task_id).await {
            error!(
                "Cascade for task {} of instance {} failed: {}",
                task_id, instance_id, e
            );
        }

        Ok(task)
    }

    /// Status, step progress and task counts of an instance.
    pub async fn get_workflow_status(&self, instance_id: Uuid) -> EngineResult<WorkflowStatusReport> {
        let instance = self.ctx.require_instance(instance_id).await?;
        let tasks = self.ctx.tasks.tasks_for_instance(instance_id).await?;
        Ok(WorkflowStatusReport {
            instance_id,
            workflow_name: instance.workflow_name,
            status: instance.status,
            current_step: instance.current_step_order,
            total_steps: instance.total_steps,
            task_counts: TaskCounts::from_tasks(&tasks),
        })
    }

    /// Cancel an instance and its PENDING tasks.
    pub async fn cancel_workflow(
        &self,
        instance_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> EngineResult<WorkflowInstance> {
        self.terminate(instance_id, InstanceStatus::Cancelled, reason, actor)
            .await
    }

    /// Reject an in-progress instance and cancel its PENDING tasks.
    pub async fn reject_workflow(
        &self,
        instance_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> EngineResult<WorkflowInstance> {
        self.terminate(instance_id, InstanceStatus::Rejected, reason, actor)
            .await
    }

    async fn terminate(
        &self,
        instance_id: Uuid,
        to: InstanceStatus,
        reason: &str,
        actor: &str,
    ) -> EngineResult<WorkflowInstance> {
        let ctx = &self.ctx;
        let guard = ctx.locks.lock(instance_id).await;

        let mut instance = ctx.require_instance(instance_id).await?;
        let previous = InstanceStateMachine::transition(&mut instance, to, Some(reason))?;
        if !ctx.instances.transition_instance(&instance, previous).await? {
            return Err(EngineError::InvalidState(format!(
                "instance {} changed concurrently",
                instance_id
            )));
        }
        let sweep = ctx.sweep_pending(&instance, actor).await;
        drop(guard);
        ctx.locks.forget(instance_id);

        let (kind, verb) = match to {
            InstanceStatus::Rejected => (EventKind::WorkflowFailed, "rejected"),
            _ => (EventKind::WorkflowCancelled, "cancelled"),
        };
        let message = format!(
            "Workflow '{}' {} by {}: {}",
            instance.workflow_name, verb, actor, reason
        );
        info!("Workflow instance {} {} by {}", instance_id, verb, actor);

        ctx.effects
            .publish(
                WorkflowEvent::for_instance(kind, &instance, actor, &message)
                    .with_metadata("reason", json!(reason)),
            )
            .await;
        ctx.announce_finished(&instance, &message).await;

        let sweep = sweep?;
        ctx.announce_cancelled(&instance, &sweep.cancelled, actor).await;
        if !sweep.failed.is_empty() {
            return Err(EngineError::Store(format!(
                "instance {} {} but {} PENDING tasks could not be cancelled",
                instance_id,
                verb,
                sweep.failed.len()
            )));
        }

        Ok(instance)
    }

    /// Cancel PENDING tasks left behind on a cancelled or explicitly
    /// rejected instance. Returns the ids of the tasks cancelled now.
    pub async fn finish_cancellation(&self, instance_id: Uuid) -> EngineResult<Vec<Uuid>> {
        let ctx = &self.ctx;
        let guard = ctx.locks.lock(instance_id).await;
        let instance = ctx.require_instance(instance_id).await?;
        if !InstanceStateMachine::cancels_pending(&instance) {
            return Err(EngineError::InvalidState(format!(
                "instance {} is {} and has nothing to cancel",
                instance_id, instance.status
            )));
        }
        let sweep = ctx.sweep_pending(&instance, &ctx.config.system_actor).await?;
        drop(guard);
        ctx.locks.forget(instance_id);

        ctx.announce_cancelled(&instance, &sweep.cancelled, &ctx.config.system_actor)
            .await;
        if !sweep.failed.is_empty() {
            return Err(EngineError::Store(format!(
                "{} PENDING tasks of instance {} could not be cancelled",
                sweep.failed.len(),
                instance_id
            )));
        }
        Ok(sweep.cancelled.iter().map(|t| t.id).collect())
    }

    pub async fn get_task(&self, task_id: Uuid) -> EngineResult<Task> {
        self.ctx.require_task(task_id).await
    }

    pub async fn get_instance(&self, instance_id: Uuid) -> EngineResult<WorkflowInstance> {
        self.ctx.require_instance(instance_id).await
    }

    /// Instances filtered by workflow id and status.
    pub async fn list_instances(
        &self,
        workflow_id: Option<&str>,
        status: Option<InstanceStatus>,
    ) -> EngineResult<Vec<WorkflowInstance>> {
        self.ctx.instances.list_instances(workflow_id, status).await
    }

    /// All tasks of an instance, ordered by step.
    pub async fn list_instance_tasks(&self, instance_id: Uuid) -> EngineResult<Vec<Task>> {
        self.ctx.require_instance(instance_id).await?;
        let mut tasks = self.ctx.tasks.tasks_for_instance(instance_id).await?;
        tasks.sort_by_key(|t| (t.step_order, t.created_at));
        Ok(tasks)
    }

    /// Open tasks of an instance with no unsatisfied parent.
    pub async fn ready_tasks(&self, instance_id: Uuid) -> EngineResult<Vec<Task>> {
        self.open_tasks_with(instance_id, Readiness::Ready).await
    }

    /// Open tasks of an instance with at least one unsatisfied parent.
    pub async fn blocked_tasks(&self, instance_id: Uuid) -> EngineResult<Vec<Task>> {
        self.open_tasks_with(instance_id, Readiness::Blocked).await
    }

    async fn open_tasks_with(
        &self,
        instance_id: Uuid,
        readiness: Readiness,
    ) -> EngineResult<Vec<Task>> {
        let instance = self.ctx.require_instance(instance_id).await?;
        let definition = self.ctx.definition_for(&instance).await?;
        let snapshot =
            InstanceSnapshot::load(self.ctx.tasks.as_ref(), instance_id, &definition).await?;
        let mut tasks: Vec<Task> = snapshot
            .tasks()
            .filter(|t| t.is_open() && snapshot.readiness(t.id) == readiness)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.step_order, t.created_at));
        Ok(tasks)
    }

    /// Tasks assigned to a user across all instances.
    pub async fn tasks_for_user(&self, username: &str) -> EngineResult<Vec<Task>> {
        self.ctx.tasks.tasks_for_user(username).await
    }
}
