//! User notification protocol.

use async_trait::async_trait;

use crate::error::EngineResult;

/// Delivers user-facing notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notify one user. Callers treat failures as non-fatal.
    async fn notify_user(
        &self,
        username: &str,
        subject: &str,
        status: &str,
        message: &str,
    ) -> EngineResult<()>;
}
