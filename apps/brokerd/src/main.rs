//! Relay broker daemon entry point.

mod config;

use std::net::SocketAddr;

use relay_broker::{BrokerConfig, BrokerServer};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting relay broker");

    let config = config::Config::load()?;
    tracing::info!(bind = %config.bind_address, port = config.port, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("broker shut down cleanly");
    Ok(())
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let server = BrokerServer::new(BrokerConfig {
        bind_address: config.bind_address,
        port: config.port,
    });
    let addr: SocketAddr = server.start().await?;
    tracing::info!("accepting clients on ws://{addr}");

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        clients = server.broker().connection_count().await,
        "interrupt received, stopping"
    );
    server.stop();
    Ok(())
}
