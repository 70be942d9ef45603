//! # ApprovalFlow Core
//!
//! Workflow execution core: turns a workflow definition into a graph of
//! per-user tasks and drives it to a terminal state.
//!
//! ## Features
//!
//! - Condition matching and step activation
//! - Task generation with sequential and parallel-group dependency wiring
//! - Acyclic dependency graph
//! - Dependency resolution and parallel group completion strategies
//! - Cascade engine shared by the direct call path and the event path,
//!   serialized per workflow instance
//! - Instance state machine and timeout actions

pub mod activator;
pub mod cascade;
pub mod condition;
pub mod effects;
pub mod engine;
pub mod generator;
pub mod graph;
pub mod locks;
pub mod parallel;
pub mod resolver;
pub mod state;
pub mod timeout;
pub mod validation;

pub use activator::{is_step_active, select_active_steps};
pub use cascade::{CascadeEngine, CascadeOutcome};
pub use condition::Condition;
pub use effects::Effects;
pub use engine::{Collaborators, WorkflowEngine};
pub use generator::{GeneratedTasks, TaskGenerator};
pub use graph::{DependencyGraph, GraphError};
pub use locks::InstanceLocks;
pub use parallel::is_group_satisfied;
pub use resolver::{InstanceSnapshot, Readiness};
pub use state::InstanceStateMachine;
pub use timeout::TimeoutOutcome;
pub use validation::{DefinitionReport, validate_definition};
