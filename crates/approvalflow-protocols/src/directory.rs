//! User directory protocol.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// A user eligible for task assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserRef {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: None,
        }
    }
}

/// Resolves role names to users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Users holding `role`, in a stable order.
    async fn find_users_by_role(&self, role: &str) -> EngineResult<Vec<UserRef>>;
}
