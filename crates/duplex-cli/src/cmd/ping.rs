//! `duplex ping`: measure round-trip latency to a node.

use crate::ui;
use duplex_types::NodeConfig;
use duplex_wire::tcp::TcpProvider;
use duplex_wire::{Node, PeerSession, Transport, WireError, WireResult, EVENT_QUEUE_CAPACITY};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub fn cmd_ping(config: NodeConfig, addr: SocketAddr, count: u32, timeout_ms: u64) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    };

    match rt.block_on(ping(config, addr, count, Duration::from_millis(timeout_ms))) {
        Ok(rtts) if !rtts.is_empty() => {
            ui::blank();
            ui::section("Summary");
            let min = rtts.iter().min().copied().unwrap_or_default();
            let max = rtts.iter().max().copied().unwrap_or_default();
            let avg = rtts.iter().sum::<i64>() / rtts.len() as i64;
            ui::kv("Received", &format!("{}/{count}", rtts.len()));
            ui::kv_ok("RTT", &format!("min {min} ms, avg {avg} ms, max {max} ms"));
        }
        Ok(_) => {
            ui::error("No PONG received");
            std::process::exit(1);
        }
        Err(e) => {
            ui::error_with_fix(
                &format!("Could not reach {addr}: {e}"),
                "start a node there with `duplex start`",
            );
            std::process::exit(1);
        }
    }
}

/// Connect to `addr` and ping it `count` times. Returns the successful RTTs.
async fn ping(config: NodeConfig, addr: SocketAddr, count: u32, timeout: Duration) -> WireResult<Vec<i64>> {
    let node = Node::new(config);
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(Arc::clone(&node).run(events_rx, shutdown_rx));

    let provider = TcpProvider::new(node.id(), events_tx);
    let transport = provider.connect(addr).await?;
    let session = wait_for_session(&node, transport.peer_id(), timeout).await?;

    ui::section(&format!("PING {session} ({})", transport.remote_addr()));
    let mut rtts = Vec::new();
    for seq in 0..count {
        if seq > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        match tokio::time::timeout(timeout, node.ping(&session)).await {
            Ok(Ok(trip)) => {
                ui::success(&format!("PONG from {session}: seq={seq} time={} ms", trip.rtt_ms));
                rtts.push(trip.rtt_ms);
            }
            Ok(Err(e)) => {
                ui::error(&format!("seq={seq}: {e}"));
                if matches!(e, WireError::SessionClosed) {
                    break;
                }
            }
            Err(_) => ui::error(&format!("seq={seq}: timed out after {} ms", timeout.as_millis())),
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = runner.await;
    Ok(rtts)
}

/// Wait for the node's event loop to register the new connection.
async fn wait_for_session(node: &Node, peer_id: &str, timeout: Duration) -> WireResult<Arc<PeerSession>> {
    tokio::time::timeout(timeout, async {
        loop {
            if let Some(session) = node.session(peer_id) {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| WireError::Transport(format!("{peer_id} never became ready")))
}
