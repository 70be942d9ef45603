//! Timeout actions.
//!
//! A timeout is due once the instance has sat on the guarded step for the
//! timeout's duration, measured from `current_step_entered_at`. Each timeout
//! fires at most once per instance; the fired id is recorded on the instance
//! in the same write that claims it. A fired AUTO_APPROVE or AUTO_REJECT
//! timeout resolves whatever its step still has open on later calls, so a
//! task write that failed the first time is retried.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use approvalflow_protocols::{
    ESCALATION_ACTOR, EngineResult, EventKind, InstanceStatus, TIMEOUT_ACTOR, Task, TaskPriority,
    TaskStatus, TimeoutAction, TimeoutDefinition, WorkflowEvent,
};

use crate::engine::WorkflowEngine;

/// Result of applying one timeout to one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Nothing happened.
    Skipped(String),
    /// Open tasks of the step were forced to `status`. Tasks in `failed`
    /// could not be written and are retried by the next call.
    AutoResolved {
        status: TaskStatus,
        tasks: Vec<Uuid>,
        failed: Vec<Uuid>,
    },
    /// Escalation tasks were created.
    Escalated { tasks: Vec<Uuid> },
    /// Users with a task in the instance were notified.
    Notified { recipients: Vec<String> },
}

impl TimeoutOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn fired(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }
}

impl WorkflowEngine {
    /// Apply `timeout` to an instance if it is due at `now`.
    pub async fn apply_timeout(
        &self,
        instance_id: Uuid,
        timeout: &TimeoutDefinition,
        now: DateTime<Utc>,
    ) -> EngineResult<TimeoutOutcome> {
        let ctx = &self.ctx;
        let guard = ctx.locks.lock(instance_id).await;

        let mut instance = ctx.require_instance(instance_id).await?;
        if instance.status != InstanceStatus::InProgress {
            return Ok(TimeoutOutcome::skipped("instance is not in progress"));
        }
        if instance.current_step_order != timeout.step {
            return Ok(TimeoutOutcome::skipped("instance is on another step"));
        }
        let resuming = instance.has_fired(&timeout.id);
        if resuming && !timeout.action.forces_outcome() {
            return Ok(TimeoutOutcome::skipped("timeout already fired"));
        }
        let entered = instance
            .current_step_entered_at
            .or(instance.started_at)
            .unwrap_or(instance.created_at);
        if !resuming && now < entered + timeout.duration() {
            return Ok(TimeoutOutcome::skipped("step is not overdue"));
        }

        let definition = ctx.definition_for(&instance).await?;
        let step_name = definition
            .step(timeout.step)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("Step {}", timeout.step));

        if !resuming {
            instance.fired_timeouts.push(timeout.id.clone());
            instance.updated_at = now;
            if !ctx
                .instances
                .transition_instance(&instance, InstanceStatus::InProgress)
                .await?
            {
                return Ok(TimeoutOutcome::skipped("instance changed concurrently"));
            }

            info!(
                "Timeout '{}' ({}) fired for instance {} on step {} '{}'",
                timeout.id,
                timeout.action.name(),
                instance.id,
                timeout.step,
                step_name
            );
        }

        match &timeout.action {
            TimeoutAction::AutoApprove | TimeoutAction::AutoReject => {
                let (status, label) = match timeout.action {
                    TimeoutAction::AutoApprove => (TaskStatus::Completed, "AUTO_APPROVED"),
                    _ => (TaskStatus::Rejected, "AUTO_REJECTED"),
                };

                let tasks = ctx.tasks.tasks_for_instance(instance.id).await?;
                let open: Vec<Task> = tasks
                    .into_iter()
                    .filter(|t| t.step_order == timeout.step && t.is_open() && !t.escalation)
                    .collect();
                if resuming && open.is_empty() {
                    return Ok(TimeoutOutcome::skipped("timeout already fired"));
                }

                let mut resolved = Vec::new();
                let mut failed = Vec::new();
                for task in open {
                    let previous = task.status;
                    let mut updated = task;
                    updated.apply_status(status, TIMEOUT_ACTOR);
                    match ctx.tasks.transition_task(&updated, previous).await {
                        Ok(true) => resolved.push(updated),
                        Ok(false) => warn!("Task {} changed before timeout could resolve it", updated.id),
                        Err(e) => {
                            error!(
                                "Failed to resolve task {} of instance {} on timeout '{}', will retry: {}",
                                updated.id, instance.id, timeout.id, e
                            );
                            failed.push(updated.id);
                        }
                    }
                }
                drop(guard);

                let kind = if status == TaskStatus::Rejected {
                    EventKind::TaskRejected
                } else {
                    EventKind::TaskCompleted
                };
                for task in &resolved {
                    ctx.effects
                        .publish(
                            WorkflowEvent::for_task(
                                kind,
                                &instance,
                                task,
                                TIMEOUT_ACTOR,
                                format!("Task '{}' {} by {}", task.title, status, TIMEOUT_ACTOR),
                            )
                            .with_metadata("timeoutId", json!(timeout.id)),
                        )
                        .await;
                    ctx.effects
                        .notify_task(
                            task,
                            label,
                            &format!(
                                "Task '{}' was {} because step '{}' timed out",
                                task.title,
                                status.as_str(),
                                step_name
                            ),
                        )
                        .await;
                }
                for task in &resolved {
                    if let Err(e) = self.cascade(task.id).await {
                        error!("Cascade for timed out task {} failed: {}", task.id, e);
                    }
                }

                Ok(TimeoutOutcome::AutoResolved {
                    status,
                    tasks: resolved.iter().map(|t| t.id).collect(),
                    failed,
                })
            }

            TimeoutAction::Escalate { role } => {
                let users = ctx.directory.find_users_by_role(role).await?;
                if users.is_empty() {
                    warn!(
                        "No users with escalation role '{}' for instance {}",
                        role, instance.id
                    );
                }
                let due_in = Duration::days(i64::from(ctx.config.escalation_due_days));
                let escalations: Vec<Task> = users
                    .iter()
                    .map(|user| {
                        Task::new(instance.id, timeout.step, &step_name, &user.username, due_in)
                            .with_title(format!("ESCALATED: {}", step_name))
                            .with_description("This task was escalated due to timeout")
                            .with_priority(TaskPriority::High)
                            .with_status(TaskStatus::Ready)
                            .with_created_by(ESCALATION_ACTOR)
                            .as_escalation()
                    })
                    .collect();
                ctx.tasks.insert_tasks(&escalations).await?;
                drop(guard);

                for task in &escalations {
                    let message = format!("Task '{}' has been escalated to {}", task.title, task.assigned_to);
                    ctx.effects
                        .publish_all(vec![
                            WorkflowEvent::for_task(
                                EventKind::TaskCreated,
                                &instance,
                                task,
                                ESCALATION_ACTOR,
                                &message,
                            )
                            .with_metadata("escalationRole", json!(role)),
                            WorkflowEvent::for_task(
                                EventKind::TaskAssigned,
                                &instance,
                                task,
                                ESCALATION_ACTOR,
                                &message,
                            ),
                        ])
                        .await;
                    ctx.effects.notify_task(task, "ESCALATED", &message).await;
                }

                Ok(TimeoutOutcome::Escalated {
                    tasks: escalations.iter().map(|t| t.id).collect(),
                })
            }

            TimeoutAction::Notify { message } => {
                let tasks = ctx.tasks.tasks_for_instance(instance.id).await?;
                drop(guard);

                let mut recipients: Vec<String> =
                    tasks.into_iter().map(|t| t.assigned_to).collect();
                recipients.sort();
                recipients.dedup();

                let text = message.clone().unwrap_or_else(|| {
                    format!(
                        "Step '{}' has timed out in workflow instance {}",
                        step_name, instance.id
                    )
                });
                let subject = format!("Step Timeout: {}", step_name);
                join_all(
                    recipients
                        .iter()
                        .map(|user| ctx.effects.notify(user, &subject, "TIMEOUT", &text)),
                )
                .await;

                Ok(TimeoutOutcome::Notified { recipients })
            }
        }
    }
}
