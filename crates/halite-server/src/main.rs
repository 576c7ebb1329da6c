//! `halite-server` binary entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use halite_config::ConfigLoader;
use halite_server::{Server, SystemClock};
use halite_types::NodeId;

/// A replica of the Halite replicated chat service.
#[derive(Debug, Parser)]
#[command(name = "halite-server", version, about)]
struct Args {
    /// Path to the cluster configuration file (TOML).
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// This node's id in the cluster configuration.
    #[arg(long, short = 'n')]
    node_id: u32,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = ConfigLoader::new()
        .with_file(&args.config)
        .load()
        .with_context(|| format!("loading {}", args.config.display()))?;
    let mut server = Server::new(config, NodeId::new(args.node_id), SystemClock)
        .context("starting node")?;
    server.run().context("running node")?;
    Ok(())
}
