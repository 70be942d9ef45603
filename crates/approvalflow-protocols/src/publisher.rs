//! Event emission protocol.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::WorkflowEvent;

/// Publishes workflow events to a message bus.
///
/// Consumers on the other side must tolerate at-least-once delivery.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event.
    async fn publish(&self, event: WorkflowEvent) -> EngineResult<()>;
}
