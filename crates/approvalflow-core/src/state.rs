//! Workflow instance state machine.
//!
//! ```text
//! PENDING -> IN_PROGRESS -> { COMPLETED, REJECTED, CANCELLED }
//! PENDING -> CANCELLED
//! ```
//!
//! Terminal states accept no further transition.

use chrono::Utc;

use approvalflow_protocols::{EngineError, EngineResult, InstanceStatus, WorkflowInstance};

/// Owns instance-level status transitions.
pub struct InstanceStateMachine;

impl InstanceStateMachine {
    /// Whether `from -> to` is allowed.
    pub fn can_transition(from: InstanceStatus, to: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (from, to),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Rejected)
                | (InProgress, Cancelled)
        )
    }

    /// Move `instance` to `to`, stamping timestamps and the reason.
    ///
    /// Returns the previous status, which callers pass to the store's
    /// compare-and-transition write.
    pub fn transition(
        instance: &mut WorkflowInstance,
        to: InstanceStatus,
        reason: Option<&str>,
    ) -> EngineResult<InstanceStatus> {
        let from = instance.status;
        if !Self::can_transition(from, to) {
            return Err(EngineError::InvalidState(format!(
                "instance {} cannot move from {} to {}",
                instance.id, from, to
            )));
        }

        let now = Utc::now();
        instance.status = to;
        instance.updated_at = now;
        match to {
            InstanceStatus::InProgress => {
                instance.started_at = Some(now);
                instance.current_step_entered_at = Some(now);
            }
            InstanceStatus::Completed => {
                instance.completed_at = Some(now);
            }
            InstanceStatus::Rejected => {
                instance.completed_at = Some(now);
                instance.cancellation_reason = reason.map(str::to_string);
            }
            InstanceStatus::Cancelled => {
                instance.cancelled_at = Some(now);
                instance.cancellation_reason = reason.map(str::to_string);
            }
            InstanceStatus::Pending => {}
        }
        Ok(from)
    }

    /// Whether `instance` was ended by a cancellation or an explicit
    /// rejection, both of which cancel its PENDING tasks.
    pub fn cancels_pending(instance: &WorkflowInstance) -> bool {
        match instance.status {
            InstanceStatus::Cancelled => true,
            InstanceStatus::Rejected => instance.cancellation_reason.is_some(),
            _ => false,
        }
    }

    /// Raise `current_step_order` to `step`, never lowering it.
    ///
    /// Returns whether the step changed.
    pub fn advance_step(instance: &mut WorkflowInstance, step: u32) -> bool {
        if step <= instance.current_step_order {
            return false;
        }
        let now = Utc::now();
        instance.current_step_order = step;
        instance.current_step_entered_at = Some(now);
        instance.updated_at = now;
        true
    }
}
