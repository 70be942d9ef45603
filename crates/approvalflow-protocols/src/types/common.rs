//! Common utility types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[cfg(test)]
#[path = "common_tests.rs"]
mod tests;

/// Free-form metadata map.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Evaluation context passed to `StartWorkflow` and matched by step conditions.
pub type Context = HashMap<String, serde_json::Value>;

/// Actor recorded on system-driven task updates.
pub const SYSTEM_ACTOR: &str = "system";

/// Actor recorded on timeout-forced task updates.
pub const TIMEOUT_ACTOR: &str = "system-timeout";

/// Actor recorded on escalation tasks.
pub const ESCALATION_ACTOR: &str = "system-escalation";

/// Task priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// HIGH and CRITICAL tasks cancel their instance when rejected.
    pub fn is_critical(&self) -> bool {
        *self >= TaskPriority::High
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
            TaskPriority::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

/// Render a context value the way condition expressions compare it.
///
/// Strings compare by their contents, everything else by its JSON text.
pub fn context_value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
