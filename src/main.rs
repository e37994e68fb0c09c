use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use geolocate::config::{Cli, Command};
use geolocate::worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c, shutting down"),
        }
        on_signal.cancel();
    });

    match cli.command {
        Command::Coordinator(args) => {
            let server = args.into_server();
            server.serve(shutdown).await?;
            let stats = server.stats().snapshot();
            info!(
                connections = stats.total_connections,
                requests = stats.num_requests,
                errors = stats.num_errors,
                "coordinator stopped"
            );
        }
        Command::Worker(args) => worker::run(args.into_config(), shutdown).await?,
    }
    Ok(())
}
