//! Monitor errors.

use thiserror::Error;

use approvalflow_protocols::EngineError;

/// Monitor error types.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A notification channel failed to deliver.
    #[error("Notification delivery failed via {channel}: {message}")]
    Delivery { channel: String, message: String },

    /// Engine error raised during a scan.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl MonitorError {
    pub fn delivery(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            channel: channel.into(),
            message: message.into(),
        }
    }
}
