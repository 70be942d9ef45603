//! Engine error taxonomy.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the workflow engine and its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Workflow definition not found.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Workflow instance not found.
    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// A non-terminal instance already exists for the entity.
    #[error("Workflow instance already exists for {entity_type} {entity_id}")]
    AlreadyExists {
        entity_type: String,
        entity_id: String,
    },

    /// Task status change rejected by the task state machine.
    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Instance status change rejected by the instance state machine.
    #[error("Invalid instance state: {0}")]
    InvalidState(String),

    /// Workflow definition is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transient store failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Create an invalid transition error from any two displayable statuses.
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether this error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::WorkflowNotFound(_) | Self::InstanceNotFound(_) | Self::TaskNotFound(_)
        )
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_not_found_error() {
        let err = EngineError::WorkflowNotFound("Fruit Approval".to_string());
        let display = err.to_string();
        assert!(display.contains("not found"));
        assert!(display.contains("Fruit Approval"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_already_exists_error() {
        let err = EngineError::AlreadyExists {
            entity_type: "FRUIT".to_string(),
            entity_id: "42".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("FRUIT"));
        assert!(display.contains("42"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_invalid_transition_helper() {
        let err = EngineError::invalid_transition("COMPLETED", "REJECTED");
        assert!(matches!(
            err,
            EngineError::InvalidTransition { ref from, ref to } if from == "COMPLETED" && to == "REJECTED"
        ));
    }

    #[test]
    fn test_all_error_variants_display() {
        let errors: Vec<EngineError> = vec![
            EngineError::WorkflowNotFound("w".to_string()),
            EngineError::InstanceNotFound(Uuid::new_v4()),
            EngineError::TaskNotFound(Uuid::new_v4()),
            EngineError::InvalidState("s".to_string()),
            EngineError::Configuration("c".to_string()),
            EngineError::Store("io".to_string()),
        ];

        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
