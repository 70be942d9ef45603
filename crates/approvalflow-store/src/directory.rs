//! Static user directory.

use std::collections::BTreeMap;

use async_trait::async_trait;

use approvalflow_config::UserConfig;
use approvalflow_protocols::{EngineResult, UserDirectory, UserRef};

/// Role lookup over a fixed user list.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    // role -> users, in registration order
    roles: BTreeMap<String, Vec<UserRef>>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[[users]]` configuration section.
    pub fn from_config(users: &[UserConfig]) -> Self {
        let mut directory = Self::new();
        for user in users {
            let mut entry = UserRef::new(&user.username);
            entry.display_name = user.display_name.clone();
            directory.add(entry, user.roles.iter().map(String::as_str));
        }
        directory
    }

    /// Add a user with roles.
    pub fn with_user(mut self, username: &str, roles: &[&str]) -> Self {
        self.add(UserRef::new(username), roles.iter().copied());
        self
    }

    fn add<'a>(&mut self, user: UserRef, roles: impl Iterator<Item = &'a str>) {
        for role in roles {
            let members = self.roles.entry(role.to_string()).or_default();
            if !members.iter().any(|u| u.username == user.username) {
                members.push(user.clone());
            }
        }
    }

    /// Known role names.
    pub fn roles(&self) -> Vec<&str> {
        self.roles.keys().map(String::as_str).collect()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn find_users_by_role(&self, role: &str) -> EngineResult<Vec<UserRef>> {
        Ok(self.roles.get(role).cloned().unwrap_or_default())
    }
}
