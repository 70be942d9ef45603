//! Runtime task and task dependency types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::{SYSTEM_ACTOR, TaskPriority};

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet resolved against its dependencies.
    Pending,
    /// Waiting on at least one unsatisfied parent.
    Blocked,
    /// All parents satisfied; the assignee may start it.
    Ready,
    /// Started by the assignee.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Approved by the assignee.
    Approved,
    /// Rejected by the assignee.
    Rejected,
    /// Cancelled.
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Pending,
        TaskStatus::Blocked,
        TaskStatus::Ready,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Approved,
        TaskStatus::Rejected,
        TaskStatus::Cancelled,
    ];

    /// COMPLETED or APPROVED.
    pub fn is_successful(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Approved)
    }

    /// REJECTED.
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskStatus::Rejected)
    }

    /// No further transition is accepted.
    pub fn is_terminal(&self) -> bool {
        self.is_successful() || self.is_failed() || *self == TaskStatus::Cancelled
    }

    /// Whether the task state machine allows `self -> to`.
    ///
    /// READY may be started or finished directly; IN_PROGRESS may only be
    /// finished. Dependency resolution moves PENDING and BLOCKED tasks and is
    /// not a user transition.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        match self {
            TaskStatus::Ready => matches!(to, TaskStatus::InProgress) || to.is_terminal(),
            TaskStatus::InProgress => to.is_terminal(),
            _ => false,
        }
    }

    /// Snake-case name used for directory and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Ready => "ready",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// A per-user unit of work generated for one step of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub instance_id: Uuid,
    /// Order of the step that produced this task.
    pub step_order: u32,
    pub step_name: String,
    /// Parallel group of the step, if any.
    pub group: Option<String>,
    pub title: String,
    pub description: Option<String>,
    /// Username of the assignee.
    pub assigned_to: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub updated_by: Option<String>,
    pub comments: Option<String>,
    pub rejection_reason: Option<String>,
    /// Escalation tasks sit outside the dependency graph.
    #[serde(default)]
    pub escalation: bool,
}

impl Task {
    /// Create a PENDING, MEDIUM priority task.
    pub fn new(
        instance_id: Uuid,
        step_order: u32,
        step_name: impl Into<String>,
        assigned_to: impl Into<String>,
        due_in: Duration,
    ) -> Self {
        let now = Utc::now();
        let step_name = step_name.into();
        Self {
            id: Uuid::new_v4(),
            instance_id,
            step_order,
            title: step_name.clone(),
            step_name,
            group: None,
            description: None,
            assigned_to: assigned_to.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            due_date: now + due_in,
            created_at: now,
            updated_at: now,
            completed_at: None,
            created_by: SYSTEM_ACTOR.to_string(),
            updated_by: None,
            comments: None,
            rejection_reason: None,
            escalation: false,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the initial status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the parallel group.
    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }

    /// Set the creating actor.
    pub fn with_created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = actor.into();
        self
    }

    /// Mark as an escalation task.
    pub fn as_escalation(mut self) -> Self {
        self.escalation = true;
        self
    }

    /// Not yet in a terminal status.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Move to `status`, stamping the actor and timestamps.
    ///
    /// Does not validate the transition; callers consult the state machine.
    pub fn apply_status(&mut self, status: TaskStatus, actor: &str) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        self.updated_by = Some(actor.to_string());
        if status.is_terminal() {
            self.completed_at = Some(now);
        }
    }
}

/// Kind of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyKind {
    Sequential,
    /// Reserved.
    Parallel,
    /// Reserved.
    Conditional,
}

/// Directed edge: `dependent` cannot start until `parent` is satisfied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDependency {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub parent: Uuid,
    pub dependent: Uuid,
    pub kind: DependencyKind,
    pub created_at: DateTime<Utc>,
}

impl TaskDependency {
    /// Create a sequential edge.
    pub fn sequential(instance_id: Uuid, parent: Uuid, dependent: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            parent,
            dependent,
            kind: DependencyKind::Sequential,
            created_at: Utc::now(),
        }
    }
}
