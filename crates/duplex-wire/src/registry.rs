//! Registry of the live peer sessions of one node.
//!
//! Keys are peer identifiers and are unique: registering a session for a peer
//! that is already present replaces the old one and hands it back to the
//! caller so it can be closed.

use crate::session::PeerSession;
use crate::transport::ConnectionId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Thread-safe map of peer id → live session.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<PeerSession>>>>,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a session, returning the one it replaced, if any.
    pub fn insert(&self, session: Arc<PeerSession>) -> Option<Arc<PeerSession>> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session.peer_id().to_string(), session)
    }

    /// Remove the session for `peer_id` only if it belongs to `connection`.
    ///
    /// A connection that was superseded by a reconnect no longer owns the
    /// entry, so its late disconnect leaves the live session in place.
    pub fn remove_connection(&self, peer_id: &str, connection: ConnectionId) -> Option<Arc<PeerSession>> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        match sessions.get(peer_id) {
            Some(session) if session.connection_id() == connection => sessions.remove(peer_id),
            _ => None,
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(peer_id).cloned()
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(peer_id)
    }

    /// Snapshot of every live session except the listed peers.
    pub fn except(&self, exclusions: &[&str]) -> Vec<Arc<PeerSession>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .iter()
            .filter(|(peer_id, _)| !exclusions.contains(&peer_id.as_str()))
            .map(|(_, session)| Arc::clone(session))
            .collect()
    }

    /// Identifiers of every live session, sorted.
    pub fn peer_ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove and return every session.
    pub fn drain(&self) -> Vec<Arc<PeerSession>> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.drain().map(|(_, session)| session).collect()
    }

    pub fn len(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use std::sync::Weak;

    fn make_session(peer_id: &str) -> Arc<PeerSession> {
        Arc::new(PeerSession::new(
            Weak::new(),
            Arc::new(MemoryTransport::detached(peer_id)),
        ))
    }

    #[test]
    fn test_insert_and_get() {
        let registry = SessionRegistry::new();
        assert!(registry.insert(make_session("node-1")).is_none());

        let session = registry.get("node-1").unwrap();
        assert_eq!(session.peer_id(), "node-1");
        assert!(registry.contains("node-1"));
        assert!(registry.get("node-2").is_none());
    }

    #[test]
    fn test_insert_replaces_same_peer() {
        let registry = SessionRegistry::new();
        let first = make_session("node-1");
        registry.insert(Arc::clone(&first));

        let replaced = registry.insert(make_session("node-1")).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = SessionRegistry::new();
        let session = make_session("node-1");
        registry.insert(Arc::clone(&session));
        assert!(registry.remove_connection("node-1", session.connection_id()).is_some());
        assert!(registry.remove_connection("node-1", session.connection_id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_connection_ignores_superseded_connection() {
        let registry = SessionRegistry::new();
        let old = make_session("node-1");
        let new = make_session("node-1");
        registry.insert(Arc::clone(&old));
        registry.insert(Arc::clone(&new));

        assert!(registry.remove_connection("node-1", old.connection_id()).is_none());
        assert!(registry.contains("node-1"));

        let removed = registry.remove_connection("node-1", new.connection_id()).unwrap();
        assert!(Arc::ptr_eq(&removed, &new));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_except_skips_exclusions() {
        let registry = SessionRegistry::new();
        for id in ["a", "b", "c"] {
            registry.insert(make_session(id));
        }

        let mut remaining: Vec<String> = registry
            .except(&["b"])
            .iter()
            .map(|s| s.peer_id().to_string())
            .collect();
        remaining.sort();
        assert_eq!(remaining, ["a", "c"]);
        assert_eq!(registry.except(&[]).len(), 3);
        assert_eq!(registry.except(&["a", "b", "c", "zzz"]).len(), 0);
    }

    #[test]
    fn test_peer_ids_and_drain() {
        let registry = SessionRegistry::new();
        registry.insert(make_session("b"));
        registry.insert(make_session("a"));
        assert_eq!(registry.peer_ids(), ["a", "b"]);

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }
}
