//! Workflow instance types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::Context;
use super::task::{Task, TaskStatus};

/// Workflow instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Created, tasks not yet generated.
    Pending,
    /// Tasks generated, at least one step activated.
    InProgress,
    Completed,
    Rejected,
    Cancelled,
}

impl InstanceStatus {
    /// All statuses.
    pub const ALL: [InstanceStatus; 5] = [
        InstanceStatus::Pending,
        InstanceStatus::InProgress,
        InstanceStatus::Completed,
        InstanceStatus::Rejected,
        InstanceStatus::Cancelled,
    ];

    /// No further transition is accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Rejected | InstanceStatus::Cancelled
        )
    }

    /// Snake-case name used for directory labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::InProgress => "in_progress",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Rejected => "rejected",
            InstanceStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// One execution of a workflow definition against one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub entity_type: String,
    pub entity_id: String,
    pub status: InstanceStatus,
    /// Lowest step order with outstanding work; the step count once finished.
    pub current_step_order: u32,
    pub total_steps: u32,
    pub started_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// When `current_step_order` last changed; timeout deadlines count from here.
    pub current_step_entered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub context: Context,
    /// `<timeout id>` keys already applied to this instance.
    #[serde(default)]
    pub fired_timeouts: Vec<String>,
}

impl WorkflowInstance {
    /// Create a PENDING instance.
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        started_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            status: InstanceStatus::Pending,
            current_step_order: 0,
            total_steps: 0,
            started_by: started_by.into(),
            created_at: now,
            updated_at: now,
            started_at: None,
            current_step_entered_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            context: Context::new(),
            fired_timeouts: Vec::new(),
        }
    }

    /// Attach the evaluation context.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Whether the instance is finished.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `entity_type`/`entity_id` identify this instance's entity.
    pub fn is_for_entity(&self, entity_type: &str, entity_id: &str) -> bool {
        self.entity_type == entity_type && self.entity_id == entity_id
    }

    /// Whether a timeout has already been applied.
    pub fn has_fired(&self, timeout_id: &str) -> bool {
        self.fired_timeouts.iter().any(|k| k == timeout_id)
    }
}

/// Task counts per status for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub blocked: usize,
    pub ready: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub rejected: usize,
    pub cancelled: usize,
}

impl TaskCounts {
    /// Tally a task list.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            counts.total += 1;
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Blocked => counts.blocked += 1,
                TaskStatus::Ready => counts.ready += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed | TaskStatus::Approved => counts.completed += 1,
                TaskStatus::Rejected => counts.rejected += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}

/// Result of `GetWorkflowStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub instance_id: Uuid,
    pub workflow_name: String,
    pub status: InstanceStatus,
    pub current_step: u32,
    pub total_steps: u32,
    pub task_counts: TaskCounts,
}
