//! `duplex start`: run a node until Ctrl+C.

use crate::ui;
use duplex_types::NodeConfig;
use duplex_wire::tcp::TcpProvider;
use duplex_wire::{negotiate, Hooks, Node, WireResult, EVENT_QUEUE_CAPACITY};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

pub fn cmd_start(mut config: NodeConfig, listen: Option<SocketAddr>, peers: Vec<SocketAddr>) {
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }
    config.peers.extend(peers);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run_node(config)) {
        ui::error_with_fix(
            &format!("Node failed: {e}"),
            "check that the listen address is free (`--listen`)",
        );
        std::process::exit(1);
    }
}

async fn run_node(config: NodeConfig) -> WireResult<()> {
    // Both ends negotiate as soon as a connection opens; the exchange is
    // idempotent, so it does not matter who dials.
    let hooks = Hooks::new()
        .on_open(|session| {
            let session = Arc::clone(session);
            tokio::spawn(async move {
                if let Err(e) = negotiate(&session).await {
                    warn!(peer = %session, error = %e, "Negotiation failed");
                }
            });
        })
        .after_negotiation(|session| {
            info!(peer = %session, capabilities = %session.capabilities(), "Session ready");
        })
        .on_close(|session| info!(peer = %session, "Session closed"));

    let node = Node::builder(config.clone()).hooks(hooks).build();
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let provider = TcpProvider::new(node.id(), events_tx);
    let (local_addr, accept) = provider.listen(config.listen_addr).await?;

    ui::banner();
    ui::blank();
    ui::kv("Node", node.id());
    ui::kv_ok("Listening", &local_addr.to_string());
    ui::kv("Version", &config.version.to_string());
    let capabilities = config.capabilities();
    if !capabilities.is_empty() {
        ui::kv("Capabilities", &capabilities.to_string());
    }
    ui::blank();
    ui::hint("press Ctrl+C to stop");

    let runner = tokio::spawn(Arc::clone(&node).run(events_rx, shutdown_rx));

    for addr in &config.peers {
        if let Err(e) = provider.connect(*addr).await {
            warn!(addr = %addr, error = %e, "Could not connect to peer");
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
    }
    info!("Shutting down");
    accept.abort();
    let _ = shutdown_tx.send(true);
    let _ = runner.await;

    ui::success("Node stopped");
    Ok(())
}
