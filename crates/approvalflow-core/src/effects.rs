//! Best-effort side effects: event publication and user notification.
//!
//! A failed publish or notify is logged and never rolls back the state change
//! that produced it.

use std::sync::Arc;

use tracing::warn;

use approvalflow_protocols::{EventPublisher, Notifier, Task, WorkflowEvent, WorkflowInstance};

/// Event publisher and notifier pair used after state changes.
#[derive(Clone)]
pub struct Effects {
    publisher: Arc<dyn EventPublisher>,
    notifier: Arc<dyn Notifier>,
}

impl Effects {
    pub fn new(publisher: Arc<dyn EventPublisher>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            publisher,
            notifier,
        }
    }

    /// Publish one event.
    pub async fn publish(&self, event: WorkflowEvent) {
        let kind = event.kind;
        let topic = event.topic();
        if let Err(e) = self.publisher.publish(event).await {
            warn!("Failed to publish {:?} on {}: {}", kind, topic, e);
        }
    }

    /// Publish events in order.
    pub async fn publish_all(&self, events: Vec<WorkflowEvent>) {
        for event in events {
            self.publish(event).await;
        }
    }

    /// Notify one user.
    pub async fn notify(&self, username: &str, subject: &str, status: &str, message: &str) {
        if let Err(e) = self
            .notifier
            .notify_user(username, subject, status, message)
            .await
        {
            warn!("Failed to notify {} ({}): {}", username, subject, e);
        }
    }

    /// Notify the assignee of `task`.
    pub async fn notify_task(&self, task: &Task, status: &str, message: &str) {
        let subject = format!("Task Update: {}", task.title);
        self.notify(&task.assigned_to, &subject, status, message).await;
    }

    /// Notify a user about an instance-level change.
    pub async fn notify_workflow(
        &self,
        username: &str,
        instance: &WorkflowInstance,
        status: &str,
        message: &str,
    ) {
        let subject = format!("Workflow {}", instance.status);
        self.notify(username, &subject, status, message).await;
    }
}
