//! slotd worker daemon.
//!
//! Reads packets from stdin and writes acknowledgments to stdout, one JSON
//! message per line. Logs go to stderr.

use anyhow::Context;
use clap::Parser;
use slotd::{Dispatcher, ProcessEngine, Settings, SettingsOverrides, channel, panic};
use slotd_core::DaemonState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slotd")]
#[command(about = "Worker daemon that deploys and invokes refs over stdio")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: SettingsOverrides,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
    std::process::exit(0);
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::resolve(cli.settings).context("failed to load settings")?;

    let engine = ProcessEngine::new(&settings.interpreter, settings.interpreter_args.clone())
        .with_context(|| format!("failed to set up interpreter '{}'", settings.interpreter))?;
    info!(
        interpreter = %engine.program().display(),
        shutdown_ttl = ?settings.shutdown_ttl,
        "slotd starting"
    );

    let state = Arc::new(DaemonState::new(Arc::new(engine)));
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    panic::install_reporter(outbound.clone());

    let dispatcher = Dispatcher::new(state, Some(outbound)).with_default_ttl(settings.shutdown_ttl);
    channel::serve(
        tokio::io::stdin(),
        tokio::io::stdout(),
        dispatcher,
        outbound_rx,
        settings.max_packet_bytes,
    )
    .await
    .context("message channel failed")?;

    info!("slotd shutting down");
    Ok(())
}
