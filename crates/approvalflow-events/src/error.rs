//! Event bus errors.

use thiserror::Error;

use approvalflow_protocols::EngineError;

/// Event bus error types.
#[derive(Debug, Error)]
pub enum BusError {
    /// Every subscription on the topic is gone.
    #[error("Topic closed: {0}")]
    TopicClosed(String),

    /// A handler failed to process a delivery.
    #[error("Handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },

    /// Engine error raised inside a handler.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl BusError {
    pub fn handler(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            message: message.into(),
        }
    }
}

impl From<BusError> for EngineError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Engine(inner) => inner,
            other => EngineError::Store(other.to_string()),
        }
    }
}
