//! # ApprovalFlow Monitor
//!
//! Background services around the workflow engine.
//!
//! ## Features
//!
//! - Periodic timeout scanning with per-timeout watermarks
//! - Notification dispatch to log and session channels
//! - Registry of connected user sessions

pub mod error;
pub mod notification;
pub mod session;
pub mod timeout_monitor;

pub use error::MonitorError;
pub use notification::{LogChannel, Notification, NotificationChannel, NotificationDispatcher};
pub use session::{SessionChannel, SessionHandle, SessionRegistry};
pub use timeout_monitor::{ScanReport, TimeoutMonitor};
