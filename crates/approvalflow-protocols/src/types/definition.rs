//! Workflow definition types.
//!
//! Definitions are read-only at execution time. They are usually loaded from
//! TOML, so every optional field carries a serde default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "definition_tests.rs"]
mod tests;

/// Entity type wildcard accepted by definitions that route any entity.
pub const ANY_ENTITY_TYPE: &str = "*";

fn default_true() -> bool {
    true
}

fn default_step_type() -> String {
    "APPROVAL".to_string()
}

/// A declarative workflow: ordered steps, parallel groups and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable identifier. Falls back to the name when empty.
    #[serde(default)]
    pub id: String,

    /// Unique workflow name.
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Entity type routed through this workflow, or `*`.
    pub entity_type: String,

    /// Inactive workflows cannot be started.
    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,

    #[serde(default)]
    pub groups: Vec<ParallelGroupDefinition>,

    #[serde(default)]
    pub timeouts: Vec<TimeoutDefinition>,
}

impl WorkflowDefinition {
    /// Create an empty, active workflow definition.
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            description: None,
            entity_type: entity_type.into(),
            active: true,
            steps: Vec::new(),
            groups: Vec::new(),
            timeouts: Vec::new(),
        }
    }

    /// Append a step.
    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a parallel group.
    pub fn with_group(mut self, group: ParallelGroupDefinition) -> Self {
        self.groups.push(group);
        self
    }

    /// Append a timeout.
    pub fn with_timeout(mut self, timeout: TimeoutDefinition) -> Self {
        self.timeouts.push(timeout);
        self
    }

    /// Set the active flag.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Fill in identifiers left empty by the definition author.
    ///
    /// The workflow id defaults to its name; timeout ids default to
    /// `<workflow>:<step>:<index>`.
    pub fn normalize(&mut self) {
        if self.id.is_empty() {
            self.id = self.name.clone();
        }
        for (index, timeout) in self.timeouts.iter_mut().enumerate() {
            if timeout.id.is_empty() {
                timeout.id = format!("{}:{}:{}", self.id, timeout.step, index);
            }
        }
    }

    /// Whether this workflow may run against the given entity type.
    pub fn accepts_entity_type(&self, entity_type: &str) -> bool {
        self.entity_type == ANY_ENTITY_TYPE || self.entity_type == entity_type
    }

    /// Look up a step by order.
    pub fn step(&self, order: u32) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.order == order)
    }

    /// Active steps sorted by order.
    pub fn steps_ordered(&self) -> Vec<&StepDefinition> {
        let mut steps: Vec<&StepDefinition> = self.steps.iter().filter(|s| s.active).collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// Number of steps counted by status reports.
    pub fn total_steps(&self) -> u32 {
        self.steps.iter().filter(|s| s.active).count() as u32
    }

    /// Look up an active group by name.
    pub fn group(&self, name: &str) -> Option<&ParallelGroupDefinition> {
        self.groups.iter().find(|g| g.active && g.name == name)
    }

    /// Active groups sorted by order.
    pub fn active_groups(&self) -> Vec<&ParallelGroupDefinition> {
        let mut groups: Vec<&ParallelGroupDefinition> =
            self.groups.iter().filter(|g| g.active).collect();
        groups.sort_by_key(|g| g.order);
        groups
    }

    /// The active group a step belongs to.
    ///
    /// Membership is declared either on the step (`group = "..."`) or on the
    /// group (`steps = [..]`).
    pub fn group_for_step(&self, order: u32) -> Option<&ParallelGroupDefinition> {
        let by_ref = self
            .step(order)
            .and_then(|s| s.group.as_deref())
            .and_then(|name| self.group(name));
        by_ref.or_else(|| {
            self.groups
                .iter()
                .find(|g| g.active && g.steps.contains(&order))
        })
    }

    /// Step orders belonging to a group, sorted.
    pub fn group_members(&self, group: &str) -> Vec<u32> {
        let mut members: Vec<u32> = self
            .steps
            .iter()
            .filter(|s| s.active)
            .filter(|s| {
                self.group_for_step(s.order)
                    .is_some_and(|g| g.name == group)
            })
            .map(|s| s.order)
            .collect();
        members.sort_unstable();
        members
    }

    /// Active timeouts for a step.
    ///
    /// A step with `timeout_hours` and no explicit timeout gets an implicit
    /// NOTIFY timeout.
    pub fn active_timeouts(&self, step_order: u32) -> Vec<TimeoutDefinition> {
        let explicit: Vec<TimeoutDefinition> = self
            .timeouts
            .iter()
            .filter(|t| t.active && t.step == step_order)
            .cloned()
            .collect();
        if !explicit.is_empty() {
            return explicit;
        }

        match self.step(step_order).and_then(|s| s.timeout_hours) {
            Some(hours) => {
                let mut implicit =
                    TimeoutDefinition::new(step_order, hours, TimeoutAction::Notify { message: None });
                implicit.id = format!("{}:{}:implicit", self.id, step_order);
                vec![implicit]
            }
            None => Vec::new(),
        }
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// 1-based, dense, unique within the workflow.
    pub order: u32,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_step_type")]
    pub step_type: String,

    #[serde(default = "default_true")]
    pub required: bool,

    #[serde(default)]
    pub parallel: bool,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Role whose users receive this step's tasks.
    #[serde(default)]
    pub assigned_role: String,

    #[serde(default)]
    pub timeout_hours: Option<u64>,

    /// Name of the parallel group this step belongs to.
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,

    /// Explicit parent steps. Replaces sequential chaining when set.
    #[serde(default)]
    pub depends_on: Option<Vec<u32>>,
}

impl StepDefinition {
    /// Create an active approval step.
    pub fn new(order: u32, name: impl Into<String>, assigned_role: impl Into<String>) -> Self {
        Self {
            order,
            name: name.into(),
            description: None,
            step_type: default_step_type(),
            required: true,
            parallel: false,
            active: true,
            assigned_role: assigned_role.into(),
            timeout_hours: None,
            group: None,
            conditions: Vec::new(),
            depends_on: None,
        }
    }

    /// Place the step in a parallel group.
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self.parallel = true;
        self
    }

    /// Add a condition.
    pub fn with_condition(mut self, condition: ConditionDefinition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Declare explicit parent steps.
    pub fn with_depends_on(mut self, parents: Vec<u32>) -> Self {
        self.depends_on = Some(parents);
        self
    }

    /// Set the step timeout in hours.
    pub fn with_timeout_hours(mut self, hours: u64) -> Self {
        self.timeout_hours = Some(hours);
        self
    }

    /// Active conditions sorted by descending priority.
    pub fn active_conditions(&self) -> Vec<&ConditionDefinition> {
        let mut conditions: Vec<&ConditionDefinition> =
            self.conditions.iter().filter(|c| c.active).collect();
        conditions.sort_by(|a, b| b.priority.cmp(&a.priority));
        conditions
    }
}

/// A guard on step activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub name: String,

    /// Minimal `key=value` expression.
    pub expression: String,

    /// Higher priorities are evaluated first.
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub description: Option<String>,
}

impl ConditionDefinition {
    /// Create an active condition.
    pub fn new(name: impl Into<String>, expression: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            priority,
            active: true,
            description: None,
        }
    }
}

/// How a parallel group decides it is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStrategy {
    /// Every member task succeeded.
    AllComplete,
    /// At least one member task succeeded.
    AnyComplete,
    /// More than half of member tasks succeeded.
    Majority,
    /// At least `n` member tasks succeeded.
    Custom(u32),
}

impl Default for CompletionStrategy {
    fn default() -> Self {
        Self::AllComplete
    }
}

impl std::fmt::Display for CompletionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionStrategy::AllComplete => write!(f, "ALL_COMPLETE"),
            CompletionStrategy::AnyComplete => write!(f, "ANY_COMPLETE"),
            CompletionStrategy::Majority => write!(f, "MAJORITY"),
            CompletionStrategy::Custom(n) => write!(f, "CUSTOM({})", n),
        }
    }
}

/// A set of steps that activate together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelGroupDefinition {
    pub name: String,

    #[serde(default)]
    pub order: u32,

    #[serde(default)]
    pub strategy: CompletionStrategy,

    /// Member step orders. Steps may also join via their `group` field.
    #[serde(default)]
    pub steps: Vec<u32>,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub description: Option<String>,
}

impl ParallelGroupDefinition {
    /// Create an active group.
    pub fn new(name: impl Into<String>, strategy: CompletionStrategy) -> Self {
        Self {
            name: name.into(),
            order: 0,
            strategy,
            steps: Vec::new(),
            active: true,
            description: None,
        }
    }

    /// Declare member steps.
    pub fn with_steps(mut self, steps: Vec<u32>) -> Self {
        self.steps = steps;
        self
    }
}

/// Action applied when a step times out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Force open tasks of the step to COMPLETED.
    AutoApprove,
    /// Force open tasks of the step to REJECTED.
    AutoReject,
    /// Create escalation tasks for users holding `role`.
    Escalate { role: String },
    /// Notify everyone with a task in the instance.
    Notify {
        #[serde(default)]
        message: Option<String>,
    },
}

impl TimeoutAction {
    /// Short name used in logs and notifications.
    pub fn name(&self) -> &'static str {
        match self {
            TimeoutAction::AutoApprove => "AUTO_APPROVE",
            TimeoutAction::AutoReject => "AUTO_REJECT",
            TimeoutAction::Escalate { .. } => "ESCALATE",
            TimeoutAction::Notify { .. } => "NOTIFY",
        }
    }

    /// Whether the action forces the step's open tasks to a terminal status.
    pub fn forces_outcome(&self) -> bool {
        matches!(self, TimeoutAction::AutoApprove | TimeoutAction::AutoReject)
    }
}

/// A per-step timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutDefinition {
    /// Stable identifier, filled by [`WorkflowDefinition::normalize`] when empty.
    #[serde(default)]
    pub id: String,

    /// Order of the guarded step.
    pub step: u32,

    pub duration_hours: u64,

    pub action: TimeoutAction,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Scan watermark loaded with the definition.
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

impl TimeoutDefinition {
    /// Create an active timeout.
    pub fn new(step: u32, duration_hours: u64, action: TimeoutAction) -> Self {
        Self {
            id: String::new(),
            step,
            duration_hours,
            action,
            active: true,
            last_checked: None,
        }
    }

    /// Timeout duration as a chrono duration.
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.duration_hours as i64)
    }
}
