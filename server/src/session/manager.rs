//! Session manager for tracking all connected users

use super::connection::SessionHandle;
use crate::DevServerError;
use chathub_protocol::Envelope;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Manages all active chat sessions, one per user
pub struct SessionManager {
    /// Map of user_id -> session handle
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a session, replacing (and closing) any previous one for the user
    pub async fn register(&self, handle: SessionHandle) {
        let previous = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(handle.user_id.clone(), handle)
        };

        if let Some(previous) = previous {
            warn!("Replacing existing session for {}", previous.user_id);
            previous.close();
        }
    }

    /// Remove the session, unless a newer one already replaced it
    pub async fn unregister(&self, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&handle.user_id) {
            Some(current) if current.connection_id == handle.connection_id => {
                sessions.remove(&handle.user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, user_id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(user_id).cloned()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.sessions.read().await.contains_key(user_id)
    }

    /// Send an envelope to a specific user
    pub async fn send_to(&self, user_id: &str, envelope: &Envelope) -> Result<(), DevServerError> {
        let handle = self
            .get(user_id)
            .await
            .ok_or_else(|| DevServerError::UserOffline(user_id.to_string()))?;
        handle.send(envelope)
    }

    /// Get list of all connected user ids
    pub async fn online_users(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
