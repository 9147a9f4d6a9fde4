//! Per-endpoint session cache.
//!
//! Sessions are created lazily on first use of an endpoint and live for the
//! rest of the process. Two callers racing to establish the same session
//! both handshake; whichever writes last wins. Session ids are correlation
//! tokens, so a lost write only costs one redundant handshake.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// An established (or optimistically assumed) session with one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub server_key: String,
    pub session_id: String,
    /// `false` when the handshake was rejected and the temporary id was
    /// adopted anyway.
    pub confirmed: bool,
}

/// Shared, clone-able session cache keyed by endpoint key.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, server_key: &str) -> Option<Session> {
        self.inner.read().await.get(server_key).cloned()
    }

    /// Store a session, replacing any existing one for the same endpoint.
    pub async fn insert(&self, session: Session) {
        self.inner
            .write()
            .await
            .insert(session.server_key.clone(), session);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(key: &str, id: &str) -> Session {
        Session {
            server_key: key.into(),
            session_id: id.into(),
            confirmed: true,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let registry = SessionRegistry::new();
        assert!(registry.get("jira").await.is_none());

        registry.insert(session("jira", "s-1")).await;
        assert_eq!(registry.get("jira").await.unwrap().session_id, "s-1");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let registry = SessionRegistry::new();
        registry.insert(session("jira", "first")).await;
        registry.insert(session("jira", "second")).await;
        assert_eq!(registry.get("jira").await.unwrap().session_id, "second");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let registry = SessionRegistry::new();
        let clone = registry.clone();
        clone.insert(session("wiki", "w-1")).await;
        assert!(!registry.is_empty().await);
    }
}
