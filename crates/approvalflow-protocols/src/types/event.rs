//! Workflow events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::Metadata;
use super::instance::WorkflowInstance;
use super::task::Task;

/// Topic an event is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    WorkflowEvents,
    TaskEvents,
    ApprovalEvents,
}

impl Topic {
    /// All topics.
    pub const ALL: [Topic; 3] = [Topic::WorkflowEvents, Topic::TaskEvents, Topic::ApprovalEvents];

    /// Topic name on the bus.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::WorkflowEvents => "workflow-events",
            Topic::TaskEvents => "task-events",
            Topic::ApprovalEvents => "approval-events",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowCancelled,
    WorkflowFailed,
    TaskCreated,
    TaskAssigned,
    TaskCompleted,
    TaskRejected,
    TaskCancelled,
    StepCompleted,
    ApprovalGranted,
    ApprovalDenied,
}

impl EventKind {
    /// Task reached a terminal status; consumers run the cascade for it.
    pub fn is_task_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::TaskCompleted | EventKind::TaskRejected | EventKind::TaskCancelled
        )
    }

    /// Topic this kind is published on.
    pub fn topic(&self) -> Topic {
        match self {
            EventKind::WorkflowStarted
            | EventKind::WorkflowCompleted
            | EventKind::WorkflowCancelled
            | EventKind::WorkflowFailed
            | EventKind::StepCompleted => Topic::WorkflowEvents,
            EventKind::TaskCreated
            | EventKind::TaskAssigned
            | EventKind::TaskCompleted
            | EventKind::TaskRejected
            | EventKind::TaskCancelled => Topic::TaskEvents,
            EventKind::ApprovalGranted | EventKind::ApprovalDenied => Topic::ApprovalEvents,
        }
    }
}

/// A fact emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_id: Uuid,
    pub kind: EventKind,
    pub entity_type: String,
    pub entity_id: String,
    pub instance_id: Option<Uuid>,
    pub workflow_name: Option<String>,
    pub task_id: Option<Uuid>,
    pub status: Option<String>,
    /// Username of whoever caused the event.
    pub actor: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl WorkflowEvent {
    /// Create an event with a fresh id and timestamp.
    pub fn new(
        kind: EventKind,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        actor: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            instance_id: None,
            workflow_name: None,
            task_id: None,
            status: None,
            actor: actor.into(),
            message: message.into(),
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// Create an instance-level event.
    pub fn for_instance(
        kind: EventKind,
        instance: &WorkflowInstance,
        actor: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(kind, &instance.entity_type, &instance.entity_id, actor, message);
        event.instance_id = Some(instance.id);
        event.workflow_name = Some(instance.workflow_name.clone());
        event.status = Some(instance.status.to_string());
        event
    }

    /// Create a task-level event.
    pub fn for_task(
        kind: EventKind,
        instance: &WorkflowInstance,
        task: &Task,
        actor: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut event = Self::for_instance(kind, instance, actor, message);
        event.task_id = Some(task.id);
        event.status = Some(task.status.to_string());
        event
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Topic this event is published on.
    pub fn topic(&self) -> Topic {
        self.kind.topic()
    }
}
