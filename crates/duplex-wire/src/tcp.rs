//! TCP transport provider.
//!
//! Frames travel newline-delimited: a codec frame is a JSON string literal,
//! which never contains a raw newline. The first line each side writes after
//! the socket opens is its node id; everything after that is frames.

use crate::codec::MAX_FRAME_SIZE;
use crate::error::{WireError, WireResult};
use crate::transport::{next_connection_id, ConnectionId, Transport, TransportEvent};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// An established TCP connection to a peer.
pub struct TcpTransport {
    peer_id: String,
    connection: ConnectionId,
    remote_addr: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    closed: watch::Sender<bool>,
}

impl TcpTransport {
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    fn metadata(&self) -> Option<Value> {
        Some(json!({ "transport": "tcp", "remote_addr": self.remote_addr.to_string() }))
    }

    async fn send(&self, frame: &[u8]) -> WireResult<()> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        if *self.closed.borrow() {
            return Err(WireError::Transport(format!(
                "connection to {} is closed",
                self.peer_id
            )));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> WireResult<()> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        debug!(peer = %self.peer_id, addr = %self.remote_addr, "Closing TCP connection");
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

/// Accepts and dials TCP connections on behalf of one node.
///
/// Every connection is reported to the node's event queue as
/// [`TransportEvent`]s.
#[derive(Clone)]
pub struct TcpProvider {
    node_id: String,
    events: mpsc::Sender<TransportEvent>,
}

impl TcpProvider {
    pub fn new(node_id: impl Into<String>, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            node_id: node_id.into(),
            events,
        }
    }

    /// Bind `addr` and accept connections in a background task.
    ///
    /// Returns the bound address (useful when binding to port 0).
    pub async fn listen(&self, addr: SocketAddr) -> WireResult<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, node = %self.node_id, "Listening");

        let provider = self.clone();
        let handle = tokio::spawn(async move {
            provider.accept_loop(listener).await;
        });
        Ok((local_addr, handle))
    }

    /// Dial a peer and announce the connection once identities are exchanged.
    pub async fn connect(&self, addr: SocketAddr) -> WireResult<Arc<TcpTransport>> {
        info!(addr = %addr, "Connecting to peer");
        let stream = TcpStream::connect(addr).await?;
        self.establish(stream, addr).await
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(addr = %addr, "Accepted connection");
                    let provider = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = provider.establish(stream, addr).await {
                            warn!(addr = %addr, error = %e, "Inbound connection failed");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn establish(&self, stream: TcpStream, addr: SocketAddr) -> WireResult<Arc<TcpTransport>> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer.write_all(self.node_id.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let peer_id = match read_frame(&mut reader).await? {
            Some(line) => String::from_utf8(line)
                .map(|id| id.trim().to_string())
                .map_err(|_| WireError::Framing("identity line is not UTF-8".to_string()))?,
            None => return Err(WireError::Transport(format!("{addr} closed before identifying"))),
        };
        if peer_id.is_empty() {
            return Err(WireError::Framing("empty identity line".to_string()));
        }

        let (closed, closed_rx) = watch::channel(false);
        let connection = next_connection_id();
        let transport = Arc::new(TcpTransport {
            peer_id: peer_id.clone(),
            connection,
            remote_addr: addr,
            writer: Mutex::new(writer),
            closed,
        });

        self.events
            .send(TransportEvent::Connected(transport.clone()))
            .await
            .map_err(|_| WireError::Transport("node is no longer running".to_string()))?;

        tokio::spawn(read_loop(
            reader,
            peer_id,
            connection,
            self.events.clone(),
            closed_rx,
        ));
        Ok(transport)
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    peer_id: String,
    connection: ConnectionId,
    events: mpsc::Sender<TransportEvent>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        let closing = async {
            let _ = closed.wait_for(|closed| *closed).await;
        };
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = closing => break,
        };

        match frame {
            Ok(Some(frame)) => {
                let event = TransportEvent::Data {
                    peer_id: peer_id.clone(),
                    connection,
                    frame,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = events
                    .send(TransportEvent::Error {
                        peer_id: Some(peer_id.clone()),
                        info: e.to_string(),
                    })
                    .await;
                break;
            }
        }
    }

    debug!(peer = %peer_id, connection, "Connection ended");
    let _ = events
        .send(TransportEvent::Disconnected {
            peer_id,
            connection,
        })
        .await;
}

/// Read one newline-terminated frame. `None` at end of stream.
async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> WireResult<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let limit = MAX_FRAME_SIZE as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: buf.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(Some(buf))
}
