//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use approvalflow_protocols::WorkflowDefinition;

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Glob patterns of workflow definition files, relative to the config file.
    #[serde(default)]
    pub definitions: Vec<String>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Static user directory.
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Inline workflow definitions.
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

/// How much of the task graph is resolved when a workflow starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontierMode {
    /// Every task becomes READY or BLOCKED at start.
    Full,
    /// Only parentless tasks become READY; the rest stay PENDING until a
    /// parent's outcome cascades to them.
    Staged,
}

impl Default for FrontierMode {
    fn default() -> Self {
        Self::Full
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Due date of generated tasks, in days.
    #[serde(default = "default_due_days")]
    pub default_due_days: u32,

    /// Due date of escalation tasks, in days.
    #[serde(default = "default_escalation_due_days")]
    pub escalation_due_days: u32,

    #[serde(default)]
    pub frontier: FrontierMode,

    /// Actor recorded on engine-driven updates.
    #[serde(default = "default_system_actor")]
    pub system_actor: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_due_days: default_due_days(),
            escalation_due_days: default_escalation_due_days(),
            frontier: FrontierMode::default(),
            system_actor: default_system_actor(),
        }
    }
}

fn default_due_days() -> u32 {
    7
}

fn default_escalation_due_days() -> u32 {
    3
}

fn default_system_actor() -> String {
    "system".to_string()
}

/// Timeout monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Scan period in seconds.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: default_scan_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_scan_interval() -> u64 {
    300
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Redeliveries attempted after a handler failure.
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,

    #[serde(default = "default_redelivery_delay")]
    pub redelivery_delay_ms: u64,

    /// Buffered deliveries per subscription.
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_redeliveries: default_max_redeliveries(),
            redelivery_delay_ms: default_redelivery_delay(),
            topic_capacity: default_topic_capacity(),
        }
    }
}

fn default_max_redeliveries() -> u32 {
    5
}

fn default_redelivery_delay() -> u64 {
    200
}

fn default_topic_capacity() -> usize {
    1024
}

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::Memory
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Data directory for the file backend.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".approvalflow")
        .join("data")
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory of the rolling log files.
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,

    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            level: default_log_level(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".approvalflow")
        .join("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A user in the static directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,
}
