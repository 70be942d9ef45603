//! Connected-user sessions.
//!
//! A session is registered when a user connects and unregistered when they
//! disconnect. Notifications for a user are pushed to all of their sessions.
//! A session whose receiver was dropped without unregistering is removed on
//! the next delivery attempt.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::MonitorError;
use crate::notification::{Notification, NotificationChannel};

const SESSION_BUFFER: usize = 64;

struct SessionEntry {
    username: String,
    sender: mpsc::Sender<Notification>,
}

/// Receiving end of a registered session.
pub struct SessionHandle {
    pub id: Uuid,
    pub username: String,
    receiver: mpsc::Receiver<Notification>,
}

impl SessionHandle {
    /// Next notification pushed to this session.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    /// Notification already queued, if any.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }
}

/// Registry of live sessions keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, username: &str) -> SessionHandle {
        let (sender, receiver) = mpsc::channel(SESSION_BUFFER);
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            SessionEntry {
                username: username.to_string(),
                sender,
            },
        );
        info!("Session {} registered for {}", id, username);
        SessionHandle {
            id,
            username: username.to_string(),
            receiver,
        }
    }

    /// Returns whether the session existed.
    pub fn unregister(&self, session_id: Uuid) -> bool {
        match self.sessions.remove(&session_id) {
            Some((_, entry)) => {
                info!("Session {} unregistered for {}", session_id, entry.username);
                true
            }
            None => false,
        }
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.sessions
            .iter()
            .any(|s| s.username == username && !s.sender.is_closed())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Push a notification to every session of `username`. Returns the
    /// number of sessions that accepted it.
    pub fn deliver(&self, username: &str, notification: &Notification) -> usize {
        let targets: Vec<(Uuid, mpsc::Sender<Notification>)> = self
            .sessions
            .iter()
            .filter(|s| s.username == username)
            .map(|s| (*s.key(), s.sender.clone()))
            .collect();

        let mut delivered = 0;
        for (id, sender) in targets {
            match sender.try_send(notification.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Session {} is full, dropping notification {}", id, notification.id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.sessions.remove(&id);
                    debug!("Session {} closed, unregistered", id);
                }
            }
        }
        delivered
    }
}

/// Pushes notifications to online users.
pub struct SessionChannel {
    registry: Arc<SessionRegistry>,
}

impl SessionChannel {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NotificationChannel for SessionChannel {
    fn name(&self) -> &str {
        "session"
    }

    async fn send(&self, notification: &Notification) -> Result<(), MonitorError> {
        let delivered = self.registry.deliver(&notification.username, notification);
        if delivered == 0 {
            debug!("{} has no live session, notification {} not pushed", notification.username, notification.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(user: &str) -> Notification {
        Notification::new(user, "Task Update: Review", "READY", "ready")
    }

    #[tokio::test]
    async fn test_register_and_deliver() {
        let registry = SessionRegistry::new();
        let mut laptop = registry.register("alice");
        let mut phone = registry.register("alice");
        let _bob = registry.register("bob");

        assert_eq!(registry.deliver("alice", &note("alice")), 2);
        assert_eq!(laptop.recv().await.unwrap().status, "READY");
        assert!(phone.try_recv().is_some());
        assert!(laptop.try_recv().is_none());
    }

    #[test]
    fn test_unregister() {
        let registry = SessionRegistry::new();
        let session = registry.register("alice");
        assert!(registry.is_online("alice"));

        assert!(registry.unregister(session.id));
        assert!(!registry.unregister(session.id));
        assert!(!registry.is_online("alice"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dropped_receiver_unregistered_on_delivery() {
        let registry = SessionRegistry::new();
        let session = registry.register("carol");
        drop(session);

        assert!(!registry.is_online("carol"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.deliver("carol", &note("carol")), 0);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_offline_user_is_not_an_error() {
        let channel = SessionChannel::new(Arc::new(SessionRegistry::new()));
        channel.send(&note("dave")).await.unwrap();
    }
}
