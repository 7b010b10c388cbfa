//! Transport provider abstraction.
//!
//! The protocol engine never establishes connections itself. A transport
//! provider owns connection setup and reports each connection's lifecycle as
//! [`TransportEvent`]s; the node consumes those events and writes back through
//! the [`Transport`] handle attached to each session.

use crate::error::WireError;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies one connection for the lifetime of the process.
///
/// A peer that reconnects gets a new id, which lets the node tell events of
/// the live connection apart from those of the one it replaced.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh [`ConnectionId`].
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// One live, bidirectional connection to a remote peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identifier of the remote peer.
    fn peer_id(&self) -> &str;

    /// Identifier of this connection, carried by every event it emits.
    fn connection_id(&self) -> ConnectionId;

    /// Opaque connection metadata supplied by the remote peer, if any.
    fn metadata(&self) -> Option<serde_json::Value> {
        None
    }

    /// Deliver one complete frame to the remote peer.
    async fn send(&self, frame: &[u8]) -> Result<(), WireError>;

    /// Tear the connection down. The provider reports the resulting
    /// disconnect as an event.
    async fn close(&self) -> Result<(), WireError> {
        Ok(())
    }
}

/// Lifecycle notifications emitted by a transport provider.
pub enum TransportEvent {
    /// A connection opened.
    Connected(Arc<dyn Transport>),
    /// A complete frame arrived from `peer_id` on `connection`.
    Data {
        peer_id: String,
        connection: ConnectionId,
        frame: Vec<u8>,
    },
    /// The connection to `peer_id` closed.
    Disconnected {
        peer_id: String,
        connection: ConnectionId,
    },
    /// The provider hit an error, optionally tied to one connection.
    Error {
        peer_id: Option<String>,
        info: String,
    },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(transport) => f
                .debug_struct("Connected")
                .field("peer_id", &transport.peer_id())
                .field("connection", &transport.connection_id())
                .finish(),
            Self::Data {
                peer_id,
                connection,
                frame,
            } => f
                .debug_struct("Data")
                .field("peer_id", peer_id)
                .field("connection", connection)
                .field("len", &frame.len())
                .finish(),
            Self::Disconnected {
                peer_id,
                connection,
            } => f
                .debug_struct("Disconnected")
                .field("peer_id", peer_id)
                .field("connection", connection)
                .finish(),
            Self::Error { peer_id, info } => f
                .debug_struct("Error")
                .field("peer_id", peer_id)
                .field("info", info)
                .finish(),
        }
    }
}

/// Capacity of a node's transport event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;
