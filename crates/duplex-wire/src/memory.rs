//! In-process transport provider.
//!
//! Connects two nodes running in the same process by pushing events straight
//! into each node's event queue. Every transport also records the frames sent
//! through it, which makes it the transport of choice in tests.

use crate::error::{WireError, WireResult};
use crate::transport::{next_connection_id, ConnectionId, Transport, TransportEvent};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// One side of an in-memory connection.
///
/// Held by the local node; `peer_id` names the remote end.
pub struct MemoryTransport {
    local_id: String,
    peer_id: String,
    /// Shared by both ends of the link.
    connection: ConnectionId,
    /// Event queue of the local node, for disconnect notifications.
    local_events: Option<mpsc::Sender<TransportEvent>>,
    /// Event queue of the remote node, where sent frames are delivered.
    remote_events: Option<mpsc::Sender<TransportEvent>>,
    sent: Mutex<Vec<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// A transport whose frames go nowhere. Sent frames are still recorded.
    pub fn detached(peer_id: impl Into<String>) -> Self {
        Self {
            local_id: String::new(),
            peer_id: peer_id.into(),
            connection: next_connection_id(),
            local_events: None,
            remote_events: None,
            sent: Mutex::new(Vec::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Every frame sent so far, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    fn metadata(&self) -> Option<Value> {
        Some(json!({ "transport": "memory", "local_id": self.local_id }))
    }

    async fn send(&self, frame: &[u8]) -> WireResult<()> {
        if self.is_closed() {
            return Err(WireError::Transport(format!(
                "connection to {} is closed",
                self.peer_id
            )));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(frame.to_vec());

        let Some(remote) = &self.remote_events else {
            return Ok(());
        };
        remote
            .send(TransportEvent::Data {
                peer_id: self.local_id.clone(),
                connection: self.connection,
                frame: frame.to_vec(),
            })
            .await
            .map_err(|_| WireError::Transport(format!("{} is no longer running", self.peer_id)))
    }

    async fn close(&self) -> WireResult<()> {
        // Both ends share the flag; only the first close notifies.
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(local = %self.local_id, peer = %self.peer_id, "Closing memory connection");
        if let Some(local) = &self.local_events {
            let _ = local
                .send(TransportEvent::Disconnected {
                    peer_id: self.peer_id.clone(),
                    connection: self.connection,
                })
                .await;
        }
        if let Some(remote) = &self.remote_events {
            let _ = remote
                .send(TransportEvent::Disconnected {
                    peer_id: self.local_id.clone(),
                    connection: self.connection,
                })
                .await;
        }
        Ok(())
    }
}

/// Connect node `a` to node `b` and announce the connection to both.
///
/// Returns `a`'s transport (facing `b`) and `b`'s transport (facing `a`).
pub async fn connect(
    a_id: &str,
    a_events: &mpsc::Sender<TransportEvent>,
    b_id: &str,
    b_events: &mpsc::Sender<TransportEvent>,
) -> WireResult<(Arc<MemoryTransport>, Arc<MemoryTransport>)> {
    let connection = next_connection_id();
    let closed = Arc::new(AtomicBool::new(false));
    let a_side = Arc::new(MemoryTransport {
        local_id: a_id.to_string(),
        peer_id: b_id.to_string(),
        connection,
        local_events: Some(a_events.clone()),
        remote_events: Some(b_events.clone()),
        sent: Mutex::new(Vec::new()),
        closed: Arc::clone(&closed),
    });
    let b_side = Arc::new(MemoryTransport {
        local_id: b_id.to_string(),
        peer_id: a_id.to_string(),
        connection,
        local_events: Some(b_events.clone()),
        remote_events: Some(a_events.clone()),
        sent: Mutex::new(Vec::new()),
        closed,
    });

    let gone = |id: &str| WireError::Transport(format!("{id} is no longer running"));
    a_events
        .send(TransportEvent::Connected(a_side.clone()))
        .await
        .map_err(|_| gone(a_id))?;
    b_events
        .send(TransportEvent::Connected(b_side.clone()))
        .await
        .map_err(|_| gone(b_id))?;

    Ok((a_side, b_side))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_announces_both_sides() {
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        let (a_side, b_side) = connect("a", &a_tx, "b", &b_tx).await.unwrap();
        assert_eq!(a_side.peer_id(), "b");
        assert_eq!(b_side.peer_id(), "a");
        assert_eq!(a_side.connection_id(), b_side.connection_id());

        match a_rx.recv().await.unwrap() {
            TransportEvent::Connected(t) => assert_eq!(t.peer_id(), "b"),
            other => panic!("unexpected event: {other:?}"),
        }
        match b_rx.recv().await.unwrap() {
            TransportEvent::Connected(t) => assert_eq!(t.peer_id(), "a"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_delivers_to_remote_queue() {
        let (a_tx, _a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        let (a_side, _b_side) = connect("a", &a_tx, "b", &b_tx).await.unwrap();
        let _ = b_rx.recv().await; // Connected

        a_side.send(b"frame").await.unwrap();
        match b_rx.recv().await.unwrap() {
            TransportEvent::Data {
                peer_id,
                connection,
                frame,
            } => {
                assert_eq!(peer_id, "a");
                assert_eq!(connection, a_side.connection_id());
                assert_eq!(frame, b"frame");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(a_side.sent(), vec![b"frame".to_vec()]);
    }

    #[tokio::test]
    async fn test_close_notifies_both_sides_once() {
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        let (a_side, b_side) = connect("a", &a_tx, "b", &b_tx).await.unwrap();
        let _ = a_rx.recv().await;
        let _ = b_rx.recv().await;

        a_side.close().await.unwrap();
        b_side.close().await.unwrap();
        assert!(b_side.is_closed());

        assert!(matches!(
            a_rx.recv().await.unwrap(),
            TransportEvent::Disconnected { ref peer_id, .. } if peer_id == "b"
        ));
        assert!(matches!(
            b_rx.recv().await.unwrap(),
            TransportEvent::Disconnected { ref peer_id, .. } if peer_id == "a"
        ));
        assert!(a_rx.try_recv().is_err());
        assert!(a_side.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_each_link_gets_its_own_connection_id() {
        let (a_tx, _a_rx) = mpsc::channel(8);
        let (b_tx, _b_rx) = mpsc::channel(8);
        let (first, _) = connect("a", &a_tx, "b", &b_tx).await.unwrap();
        let (second, _) = connect("a", &a_tx, "b", &b_tx).await.unwrap();
        assert_ne!(first.connection_id(), second.connection_id());
        assert_ne!(
            MemoryTransport::detached("x").connection_id(),
            MemoryTransport::detached("x").connection_id()
        );
    }
}
