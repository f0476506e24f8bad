use anyhow::{Context, Result};
use clap::Parser;
use relay_core::RelayHub;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

mod cli;
mod config;
mod routes;
mod telemetry;

use cli::{Cli, Commands};
use config::ServerConfig;
use routes::{build_router, AppContext};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Send { url, command }) => {
            let _ = telemetry::init_tracing();
            cli::run_send(url, command).await
        }
        Some(Commands::State { url }) => {
            let _ = telemetry::init_tracing();
            cli::run_state(url).await
        }
        Some(Commands::Serve(args)) => serve(ServerConfig::try_from(args)?).await,
        None => serve(ServerConfig::try_from(cli.serve)?).await,
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let telemetry = telemetry::Telemetry::init()?;
    info!(
        listen_addr = %config.listen_addr,
        clip_ttl_secs = config.hub.clip_ttl.as_secs(),
        command_capacity = config.hub.command_capacity,
        "starting avatar-relay"
    );

    let hub = RelayHub::new(config.hub.clone());
    let sweeper = hub.spawn_sweeper();

    let ctx = AppContext::new(hub).with_metrics(telemetry.metrics_handle());
    let router = build_router(ctx.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("avatar-relay listening on {}", config.listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(ctx))
        .await
        .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    if let Some(handle) = sweeper {
        handle.abort();
    }
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal(ctx: AppContext) {
    let _ = signal::ctrl_c().await;
    ctx.begin_shutdown();
}
