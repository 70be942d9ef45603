//! User notifications and the channels that carry them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use approvalflow_protocols::{EngineResult, Notifier};

use crate::error::MonitorError;

/// A notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub username: String,
    pub subject: String,
    /// Status keyword such as `READY`, `COMPLETED` or `TIMEOUT`.
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        username: impl Into<String>,
        subject: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            subject: subject.into(),
            status: status.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Notification channel trait.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name.
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), MonitorError>;
}

/// Writes notifications to the log.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<(), MonitorError> {
        info!(
            "[NOTIFY] {} <{}> {}: {}",
            notification.username, notification.status, notification.subject, notification.message
        );
        Ok(())
    }
}

/// Fans notifications out to every registered channel.
pub struct NotificationDispatcher {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl NotificationDispatcher {
    /// Dispatcher with only the log channel.
    pub fn new() -> Self {
        Self {
            channels: vec![Box::new(LogChannel)],
        }
    }

    /// Dispatcher with no channels.
    pub fn empty() -> Self {
        Self { channels: Vec::new() }
    }

    pub fn with_channel(mut self, channel: Box<dyn NotificationChannel>) -> Self {
        self.add_channel(channel);
        self
    }

    pub fn add_channel(&mut self, channel: Box<dyn NotificationChannel>) {
        self.channels.push(channel);
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Send to every channel, returning the failures.
    pub async fn send(&self, notification: &Notification) -> Vec<MonitorError> {
        let results = join_all(self.channels.iter().map(|c| c.send(notification))).await;

        let errors: Vec<MonitorError> = results.into_iter().filter_map(Result::err).collect();
        for e in &errors {
            warn!("Notification {} to {} not delivered: {}", notification.id, notification.username, e);
        }
        errors
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn notify_user(
        &self,
        username: &str,
        subject: &str,
        status: &str,
        message: &str,
    ) -> EngineResult<()> {
        let notification = Notification::new(username, subject, status, message);
        let errors = self.send(&notification).await;
        if !errors.is_empty() {
            debug!(
                "Notification {} reached {} of {} channels",
                notification.id,
                self.channels.len() - errors.len(),
                self.channels.len()
            );
        }
        Ok(())
    }
}
