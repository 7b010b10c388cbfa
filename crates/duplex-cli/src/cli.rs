//! Clap CLI definitions for duplex.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  duplex config init                      Write a default ~/.duplex/config.toml
  duplex start                            Run a node on the configured address
  duplex start --peer 10.0.0.2:7700       Run a node and dial a peer
  duplex ping 10.0.0.2:7700 --count 10    Measure round-trip latency";

/// duplex: peer-to-peer envelope overlay node.
#[derive(Parser)]
#[command(name = "duplex", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node until interrupted.
    Start {
        /// Address to listen on (overrides `listen_addr`).
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Peer to dial on startup, in addition to the configured ones. Repeatable.
        #[arg(long = "peer")]
        peers: Vec<SocketAddr>,
    },
    /// Connect to a node and measure PING/PONG round trips.
    Ping {
        /// Address of the node to probe.
        addr: SocketAddr,
        /// Number of pings to send.
        #[arg(long, short = 'c', default_value_t = 4)]
        count: u32,
        /// Give up on a single ping after this many milliseconds.
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Show or create the configuration file [*].
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration.
    Show,
    /// Write a default configuration file.
    Init {
        /// Replace an existing file (the old one is kept as a backup).
        #[arg(long)]
        force: bool,
    },
}
