//! Cascade engine.
//!
//! Propagates one task's terminal outcome to its dependents and to the owning
//! instance. The direct call path and the event path both enter through
//! [`CascadeEngine::on_task_terminal`], which runs under the instance lock
//! and writes only through compare-and-transition, so replaying the same fact
//! leaves the end state unchanged.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use approvalflow_config::EngineConfig;
use approvalflow_protocols::{
    DefinitionStore, EngineError, EngineResult, EventKind, InstanceStatus, InstanceStore, Task,
    TaskStatus, TaskStore, UserDirectory, WorkflowDefinition, WorkflowEvent, WorkflowInstance,
};

use crate::effects::Effects;
use crate::locks::InstanceLocks;
use crate::resolver::{InstanceSnapshot, Readiness};
use crate::state::InstanceStateMachine;

#[cfg(test)]
#[path = "cascade_tests.rs"]
mod tests;

pub(crate) const CRITICAL_REJECTION_REASON: &str = "Critical task rejected";

/// Collaborators shared by the engine, the cascade and timeout handling.
pub(crate) struct EngineContext {
    pub(crate) definitions: Arc<dyn DefinitionStore>,
    pub(crate) directory: Arc<dyn UserDirectory>,
    pub(crate) tasks: Arc<dyn TaskStore>,
    pub(crate) instances: Arc<dyn InstanceStore>,
    pub(crate) effects: Effects,
    pub(crate) locks: InstanceLocks,
    pub(crate) config: EngineConfig,
}

impl EngineContext {
    pub(crate) async fn require_instance(&self, id: Uuid) -> EngineResult<WorkflowInstance> {
        self.instances
            .get_instance(id)
            .await?
            .ok_or(EngineError::InstanceNotFound(id))
    }

    pub(crate) async fn require_task(&self, id: Uuid) -> EngineResult<Task> {
        self.tasks.get_task(id).await?.ok_or(EngineError::TaskNotFound(id))
    }

    pub(crate) async fn definition_for(
        &self,
        instance: &WorkflowInstance,
    ) -> EngineResult<WorkflowDefinition> {
        self.definitions.require(&instance.workflow_id).await
    }

    /// Cancel every PENDING task among `tasks`. Caller holds the instance lock.
    ///
    /// BLOCKED, READY and IN_PROGRESS tasks are left as they are. Tasks whose
    /// write failed stay PENDING and are reported so a later sweep retries them.
    pub(crate) async fn cancel_pending<'a>(
        &self,
        tasks: impl IntoIterator<Item = &'a Task>,
        actor: &str,
    ) -> CancelSweep {
        let mut sweep = CancelSweep::default();
        for task in tasks {
            if task.status != TaskStatus::Pending {
                continue;
            }
            let mut updated = task.clone();
            updated.apply_status(TaskStatus::Cancelled, actor);
            match self.tasks.transition_task(&updated, TaskStatus::Pending).await {
                Ok(true) => sweep.cancelled.push(updated),
                Ok(false) => debug!("Task {} changed before it could be cancelled", task.id),
                Err(e) => {
                    error!(
                        "Failed to cancel task {} of instance {}: {}",
                        task.id, task.instance_id, e
                    );
                    sweep.failed.push(task.id);
                }
            }
        }
        sweep
    }

    /// Re-run the PENDING sweep of an instance that was cancelled or rejected.
    pub(crate) async fn sweep_pending(
        &self,
        instance: &WorkflowInstance,
        actor: &str,
    ) -> EngineResult<CancelSweep> {
        let tasks = self.tasks.tasks_for_instance(instance.id).await?;
        Ok(self.cancel_pending(&tasks, actor).await)
    }

    /// Publish and notify cancelled tasks.
    pub(crate) async fn announce_cancelled(
        &self,
        instance: &WorkflowInstance,
        tasks: &[Task],
        actor: &str,
    ) {
        for task in tasks {
            self.effects
                .publish(WorkflowEvent::for_task(
                    EventKind::TaskCancelled,
                    instance,
                    task,
                    actor,
                    format!("Task '{}' {} by {}", task.title, task.status, actor),
                ))
                .await;
            self.effects
                .notify_task(
                    task,
                    "CANCELLED",
                    &format!(
                        "Task '{}' has been cancelled due to workflow cancellation",
                        task.title
                    ),
                )
                .await;
        }
    }

    /// Tell the starter of `instance` about its terminal status.
    pub(crate) async fn announce_finished(&self, instance: &WorkflowInstance, message: &str) {
        self.effects
            .notify_workflow(
                &instance.started_by,
                instance,
                &instance.status.to_string(),
                message,
            )
            .await;
    }
}

/// Result of cancelling the PENDING tasks of an instance.
#[derive(Debug, Default)]
pub(crate) struct CancelSweep {
    pub(crate) cancelled: Vec<Task>,
    pub(crate) failed: Vec<Uuid>,
}

/// What one cascade run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    /// Dependents and the instance were not evaluated: the task is open or
    /// the instance is finished.
    pub skipped: bool,
    /// Dependents moved to READY.
    pub activated: Vec<Uuid>,
    /// Dependents moved to BLOCKED.
    pub blocked: Vec<Uuid>,
    /// Dependents whose update failed; a later cascade retries them.
    pub failed_dependents: Vec<Uuid>,
    /// PENDING tasks cancelled by a critical rejection or a later sweep.
    pub cancelled_tasks: Vec<Uuid>,
    /// PENDING tasks whose cancellation failed; a later cascade retries them.
    pub failed_cancellations: Vec<Uuid>,
    /// New current step, when it advanced.
    pub current_step: Option<u32>,
    /// Terminal status reached by the instance in this run.
    pub instance_status: Option<InstanceStatus>,
}

impl CascadeOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Whether the run changed any persisted state.
    pub fn changed_anything(&self) -> bool {
        !self.activated.is_empty()
            || !self.blocked.is_empty()
            || !self.cancelled_tasks.is_empty()
            || self.current_step.is_some()
            || self.instance_status.is_some()
    }

    /// Whether some write failed and the fact should be processed again.
    pub fn needs_retry(&self) -> bool {
        !self.failed_dependents.is_empty() || !self.failed_cancellations.is_empty()
    }
}

/// Single entry point for task terminal facts.
#[derive(Clone)]
pub struct CascadeEngine {
    ctx: Arc<EngineContext>,
}

impl CascadeEngine {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// React to task `task_id` having reached a terminal status.
    ///
    /// Safe to call any number of times for the same task.
    pub async fn on_task_terminal(&self, task_id: Uuid) -> EngineResult<CascadeOutcome> {
        let ctx = &self.ctx;
        let task = ctx.require_task(task_id).await?;
        if !task.status.is_terminal() {
            debug!("Task {} is {}, nothing to cascade", task_id, task.status);
            return Ok(CascadeOutcome::skipped());
        }

        let guard = ctx.locks.lock(task.instance_id).await;

        let mut instance = ctx.require_instance(task.instance_id).await?;
        if instance.status != InstanceStatus::InProgress {
            if !InstanceStateMachine::cancels_pending(&instance) {
                debug!(
                    "Instance {} is {}, cascade for task {} is a no-op",
                    instance.id, instance.status, task_id
                );
                return Ok(CascadeOutcome::skipped());
            }
            let sweep = ctx.sweep_pending(&instance, &ctx.config.system_actor).await?;
            drop(guard);
            ctx.locks.forget(instance.id);
            let mut outcome = CascadeOutcome::skipped();
            outcome.cancelled_tasks = sweep.cancelled.iter().map(|t| t.id).collect();
            outcome.failed_cancellations = sweep.failed;
            if !sweep.cancelled.is_empty() {
                info!(
                    "Cancelled {} leftover PENDING tasks of {} instance {}",
                    sweep.cancelled.len(),
                    instance.status,
                    instance.id
                );
                ctx.announce_cancelled(&instance, &sweep.cancelled, &ctx.config.system_actor)
                    .await;
            }
            return Ok(outcome);
        }

        let definition = ctx.definition_for(&instance).await?;
        let mut snapshot =
            InstanceSnapshot::load(ctx.tasks.as_ref(), instance.id, &definition).await?;
        let task = snapshot.task(task_id).cloned().unwrap_or(task);

        let mut outcome = CascadeOutcome::default();
        let mut events = Vec::new();
        let mut ready = Vec::new();

        // A satisfied group releases the dependents of all of its members.
        let mut released = vec![task.id];
        if let Some(group) = task.group.as_deref() {
            if snapshot.is_group_satisfied(group) {
                debug!("Group '{}' of instance {} is satisfied", group, instance.id);
                released.extend(snapshot.group_task_ids(group));
            }
        }
        let mut dependents: Vec<Uuid> = released
            .iter()
            .flat_map(|parent| snapshot.dependents_of(*parent))
            .collect();
        dependents.sort_unstable();
        dependents.dedup();

        for dependent in dependents {
            match self.resolve_dependent(&mut snapshot, dependent).await {
                Ok(Some((Readiness::Ready, updated))) => {
                    outcome.activated.push(updated.id);
                    ready.push(updated);
                }
                Ok(Some((Readiness::Blocked, updated))) => outcome.blocked.push(updated.id),
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "Failed to resolve dependent task {} of task {} in instance {}: {}",
                        dependent, task.id, instance.id, e
                    );
                    outcome.failed_dependents.push(dependent);
                }
            }
        }

        let previous_step = instance.current_step_order;
        let next_step = snapshot.lowest_unsettled_step().unwrap_or(instance.total_steps);
        if InstanceStateMachine::advance_step(&mut instance, next_step) {
            outcome.current_step = Some(next_step);
            events.push(
                WorkflowEvent::for_instance(
                    EventKind::StepCompleted,
                    &instance,
                    &ctx.config.system_actor,
                    format!(
                        "Workflow '{}' advanced from step {} to step {}",
                        instance.workflow_name, previous_step, next_step
                    ),
                )
                .with_metadata("fromStep", json!(previous_step))
                .with_metadata("toStep", json!(next_step)),
            );
        }

        let mut finished_message = None;
        if snapshot.open_tasks().is_empty() {
            let (status, kind, verb) = if snapshot.all_succeeded() {
                (InstanceStatus::Completed, EventKind::WorkflowCompleted, "completed")
            } else {
                (InstanceStatus::Rejected, EventKind::WorkflowFailed, "rejected")
            };
            InstanceStateMachine::transition(&mut instance, status, None)?;
            let message = format!(
                "Workflow '{}' {} for {} {}",
                instance.workflow_name, verb, instance.entity_type, instance.entity_id
            );
            events.push(WorkflowEvent::for_instance(
                kind,
                &instance,
                &ctx.config.system_actor,
                &message,
            ));
            finished_message = Some(message);
        } else if task.status == TaskStatus::Rejected && task.priority.is_critical() {
            InstanceStateMachine::transition(
                &mut instance,
                InstanceStatus::Cancelled,
                Some(CRITICAL_REJECTION_REASON),
            )?;
            let message = format!(
                "Workflow '{}' cancelled: {} ({} by {})",
                instance.workflow_name,
                CRITICAL_REJECTION_REASON,
                task.title,
                task.updated_by.as_deref().unwrap_or(&ctx.config.system_actor)
            );
            events.push(WorkflowEvent::for_instance(
                EventKind::WorkflowCancelled,
                &instance,
                &ctx.config.system_actor,
                &message,
            ));
            finished_message = Some(message);
        }

        let dirty = outcome.current_step.is_some() || finished_message.is_some();
        if dirty
            && !ctx
                .instances
                .transition_instance(&instance, InstanceStatus::InProgress)
                .await?
        {
            warn!(
                "Instance {} changed during cascade for task {}, instance update dropped",
                instance.id, task.id
            );
            events.clear();
            finished_message = None;
            outcome.current_step = None;
        }

        let mut cancelled = Vec::new();
        if finished_message.is_some() {
            outcome.instance_status = Some(instance.status);
            if instance.status == InstanceStatus::Cancelled {
                let sweep = ctx
                    .cancel_pending(snapshot.tasks(), &ctx.config.system_actor)
                    .await;
                outcome.cancelled_tasks = sweep.cancelled.iter().map(|t| t.id).collect();
                outcome.failed_cancellations = sweep.failed;
                cancelled = sweep.cancelled;
            }
            info!(
                "Workflow instance {} is {} after task {}",
                instance.id, instance.status, task.id
            );
        }

        drop(guard);

        for task in &ready {
            ctx.effects
                .notify_task(
                    task,
                    "READY",
                    &format!(
                        "Task '{}' is now ready to start (dependencies satisfied)",
                        task.title
                    ),
                )
                .await;
        }
        ctx.effects.publish_all(events).await;
        ctx.announce_cancelled(&instance, &cancelled, &ctx.config.system_actor)
            .await;
        if let Some(message) = finished_message {
            ctx.announce_finished(&instance, &message).await;
            ctx.locks.forget(instance.id);
        }

        Ok(outcome)
    }

    /// Recompute one dependent and persist a changed status.
    async fn resolve_dependent(
        &self,
        snapshot: &mut InstanceSnapshot,
        dependent: Uuid,
    ) -> EngineResult<Option<(Readiness, Task)>> {
        let Some(current) = snapshot.task(dependent).cloned() else {
            return Ok(None);
        };
        if !matches!(current.status, TaskStatus::Pending | TaskStatus::Blocked) {
            return Ok(None);
        }

        let readiness = snapshot.readiness(dependent);
        let target = readiness.status();
        if target == current.status {
            return Ok(None);
        }

        let mut updated = current.clone();
        updated.apply_status(target, &self.ctx.config.system_actor);
        if !self
            .ctx
            .tasks
            .transition_task(&updated, current.status)
            .await?
        {
            debug!("Task {} changed concurrently, skipping", dependent);
            return Ok(None);
        }

        debug!("Task {} moved {} -> {}", dependent, current.status, target);
        snapshot.replace(updated.clone());
        Ok(Some((readiness, updated)))
    }
}
