use anyhow::{Context, Result};
use beach_pier::{
    cli::{self, Cli, Commands},
    config::ServerConfig,
    serve,
    telemetry::Telemetry,
    AppState,
};
use clap::Parser;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Probe logs go to stderr; stdout carries envelopes
    if let Some(Commands::Probe(args)) = cli.command {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();
        return cli::run_probe(args).await;
    }

    let config = ServerConfig::try_from(cli.serve).context("invalid server configuration")?;
    let telemetry = Telemetry::init(config.metrics_enabled)?;

    info!(
        listen_addr = %config.listen_addr,
        keepalive_secs = config.relay.keepalive_interval.as_secs(),
        outbound_buffer = config.relay.outbound_buffer,
        prune_empty_rooms = config.relay.prune_empty_rooms,
        "starting beach-pier relay"
    );

    let state = AppState::new(config.relay.clone(), telemetry.metrics_handle());

    // Bind listener
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("beach-pier listening on {}", config.listen_addr);

    serve(listener, state, shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
