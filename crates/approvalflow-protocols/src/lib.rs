//! # ApprovalFlow Protocols
//!
//! Domain types and collaborator contracts for the ApprovalFlow engine.
//! Contains only data types and trait definitions - no engine logic.
//!
//! ## Core Traits
//!
//! - [`DefinitionStore`] - Read-only lookup of workflow definitions
//! - [`UserDirectory`] - Resolves role names to users
//! - [`TaskStore`] - Persistence of tasks and task dependencies
//! - [`InstanceStore`] - Persistence of workflow instances
//! - [`EventPublisher`] - Fire-and-forget event emission
//! - [`Notifier`] - Best-effort user notifications

pub mod definitions;
pub mod directory;
pub mod error;
pub mod notifier;
pub mod publisher;
pub mod store;
pub mod types;

pub use definitions::DefinitionStore;
pub use directory::{UserDirectory, UserRef};
pub use error::{EngineError, EngineResult};
pub use notifier::Notifier;
pub use publisher::EventPublisher;
pub use store::{InstanceStore, TaskStore};
pub use types::*;
