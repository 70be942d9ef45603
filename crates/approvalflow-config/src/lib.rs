//! # ApprovalFlow Config
//!
//! Configuration management for the ApprovalFlow engine: TOML loading with
//! `${VAR}` expansion, section defaults, workflow definition files, and
//! validation.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
