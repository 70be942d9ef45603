//! Configuration validation.
//!
//! Covers the runtime sections and the static user directory. Workflow
//! definitions are validated by the engine, which owns their semantics.

use std::collections::HashSet;

use crate::error::ConfigError;
use crate::schema::Config;

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_engine(config, &mut result);
        Self::validate_monitor(config, &mut result);
        Self::validate_events(config, &mut result);
        Self::validate_users(config, &mut result);

        Ok(result)
    }

    fn validate_engine(config: &Config, result: &mut ValidationResult) {
        if config.engine.default_due_days == 0 {
            result.add_error(ValidationError::new(
                "engine.default_due_days",
                "default_due_days must be greater than 0",
            ));
        }

        if config.engine.escalation_due_days == 0 {
            result.add_error(ValidationError::new(
                "engine.escalation_due_days",
                "escalation_due_days must be greater than 0",
            ));
        }

        if config.engine.system_actor.trim().is_empty() {
            result.add_error(ValidationError::new(
                "engine.system_actor",
                "system_actor cannot be empty",
            ));
        }
    }

    fn validate_monitor(config: &Config, result: &mut ValidationResult) {
        if config.monitor.enabled && config.monitor.scan_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "monitor.scan_interval_secs",
                "scan_interval_secs must be greater than 0",
            ));
        }

        if !config.monitor.enabled {
            result.add_warning(ValidationWarning::new(
                "monitor.enabled",
                "Timeout monitor is disabled, step timeouts will never fire",
            ));
        }
    }

    fn validate_events(config: &Config, result: &mut ValidationResult) {
        if config.events.topic_capacity == 0 {
            result.add_error(ValidationError::new(
                "events.topic_capacity",
                "topic_capacity must be greater than 0",
            ));
        }

        if config.events.max_redeliveries == 0 {
            result.add_warning(ValidationWarning::new(
                "events.max_redeliveries",
                "Redelivery is disabled, a failed event handler drops the event",
            ));
        }
    }

    fn validate_users(config: &Config, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (index, user) in config.users.iter().enumerate() {
            let path = format!("users[{}]", index);

            if user.username.trim().is_empty() {
                result.add_error(ValidationError::new(&path, "username cannot be empty"));
                continue;
            }

            if !seen.insert(user.username.as_str()) {
                result.add_error(ValidationError::new(
                    &path,
                    format!("Duplicate username '{}'", user.username),
                ));
            }

            if user.roles.is_empty() {
                result.add_warning(ValidationWarning::new(
                    &path,
                    format!("User '{}' has no roles and will never be assigned tasks", user.username),
                ));
            }
        }
    }
}
