//! Event handlers.

use async_trait::async_trait;
use tracing::{debug, warn};

use approvalflow_core::{CascadeEngine, WorkflowEngine};
use approvalflow_protocols::WorkflowEvent;

use crate::error::BusError;

/// Processes events taken off a subscription.
///
/// An `Err` leaves the delivery unacknowledged and it will be redelivered,
/// so handlers must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &WorkflowEvent) -> Result<(), BusError>;
}

/// Runs the cascade for task terminal events.
#[derive(Clone)]
pub struct CascadeHandler {
    cascade: CascadeEngine,
}

impl CascadeHandler {
    pub fn new(engine: &WorkflowEngine) -> Self {
        Self {
            cascade: engine.cascade_engine(),
        }
    }
}

#[async_trait]
impl EventHandler for CascadeHandler {
    fn name(&self) -> &str {
        "cascade"
    }

    async fn handle(&self, event: &WorkflowEvent) -> Result<(), BusError> {
        if !event.kind.is_task_terminal() {
            return Ok(());
        }
        let Some(task_id) = event.task_id else {
            warn!("Task event {} carries no task id, ignoring", event.event_id);
            return Ok(());
        };

        match self.cascade.on_task_terminal(task_id).await {
            Ok(outcome) if outcome.needs_retry() => Err(BusError::handler(
                self.name(),
                format!(
                    "{} dependents and {} cancellations of task {} could not be written",
                    outcome.failed_dependents.len(),
                    outcome.failed_cancellations.len(),
                    task_id
                ),
            )),
            Ok(outcome) => {
                debug!(
                    "Cascade for task {} activated {} and blocked {} tasks",
                    task_id,
                    outcome.activated.len(),
                    outcome.blocked.len()
                );
                Ok(())
            }
            // Redelivering cannot make a deleted record reappear.
            Err(e) if e.is_not_found() => {
                warn!("Dropping event {} for task {}: {}", event.event_id, task_id, e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
