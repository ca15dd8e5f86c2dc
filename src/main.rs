use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use vbostream::cli::Cli;
use vbostream::config::Config;
use vbostream::server::{self, ControlState};
use vbostream::sim::{OrbitFetcher, OrbitStepper};
use vbostream::streaming::SessionRegistry;
use vbostream::tick::{self, TickSource};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::resolve(&cli).context("failed to load configuration")?;

    let control_listener = TcpListener::bind(config.control_bind)
        .await
        .with_context(|| format!("failed to bind control listener on {}", config.control_bind))?;
    let data_listener = TcpListener::bind(config.data_bind)
        .await
        .with_context(|| format!("failed to bind data listener on {}", config.data_bind))?;

    let shutdown = CancellationToken::new();
    let (publisher, ticks) = tick::channel();
    let (source, settings) = TickSource::new(OrbitStepper::new(config.points), config.tick_interval());
    let source = source.spawn(publisher, shutdown.clone());

    let state = ControlState {
        registry: Arc::new(SessionRegistry::new()),
        ticks,
        fetcher: Arc::new(OrbitFetcher::new(config.encoding, config.compression_level)),
        settings,
        profile: config.profile(),
        stall_timeout: config.stall_timeout(),
    };

    tracing::info!(
        control = %control_listener.local_addr()?,
        data = %data_listener.local_addr()?,
        tick_ms = config.tick_interval_ms,
        encoding = config.encoding.content_encoding(),
        buffers = ?config.buffers,
        "vbostream listening"
    );

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "failed to listen for ctrl-c"),
            }
        });
    }

    server::serve(control_listener, data_listener, state, shutdown.clone()).await?;

    shutdown.cancel();
    match source.await {
        Ok(Ok(published)) => tracing::info!(published, "tick source stopped"),
        Ok(Err(e)) => tracing::warn!(error = %e, "tick source failed"),
        Err(e) => tracing::warn!(error = %e, "tick source task panicked"),
    }
    Ok(())
}
