//! duplex CLI: run overlay nodes and probe them from the terminal.

mod cli;
mod cmd;
mod config;
mod ui;

use crate::cli::{Cli, Commands, ConfigCommands};
use clap::Parser;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let (node_config, source) = config::read_config(cli.config.as_deref());
    init_tracing_stderr(&node_config.log_level);
    config::report(&source);

    match cli.command {
        Commands::Start { listen, peers } => cmd::start::cmd_start(node_config, listen, peers),
        Commands::Ping {
            addr,
            count,
            timeout_ms,
        } => cmd::ping::cmd_ping(node_config, addr, count, timeout_ms),
        Commands::Config(ConfigCommands::Show) => {
            cmd::config::cmd_config_show(cli.config.as_deref())
        }
        Commands::Config(ConfigCommands::Init { force }) => {
            cmd::config::cmd_config_init(cli.config.as_deref(), force)
        }
    }
}
