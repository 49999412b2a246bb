//! Vigil Agent binary
//!
//! Loads the process configuration, then either connects to the engine
//! (default) or waits for it (`reverse_connection`), until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use vigil_agent::config::AgentConfig;
use vigil_agent::discovery;
use vigil_agent::logging;
use vigil_agent::protocol::ConnectionMode;
use vigil_agent::scheduler::builder::{CheckBuilder, DefaultCheckBuilder};
use vigil_agent::streaming::client::{ClientSettings, StreamingClient, TcpConnector};
use vigil_agent::streaming::registry::ReactorRegistry;
use vigil_agent::streaming::server::StreamingServer;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::load().await.context("Failed to load agent configuration")?;
    logging::init(&config.log_level, config.log_format);

    info!("🛰️ Vigil Agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let connection_mode = if config.reverse_connection {
        ConnectionMode::PollerInitiated
    } else {
        ConnectionMode::AgentInitiated
    };
    let identification = discovery::identification(&config.host_name(), connection_mode);
    let builder = Arc::new(DefaultCheckBuilder::new(connection_mode));
    let registry = ReactorRegistry::new();
    let check_builder: Arc<dyn CheckBuilder> = builder.clone();

    let handle = if config.reverse_connection {
        let listener = TcpListener::bind(&config.endpoint)
            .await
            .with_context(|| format!("Failed to listen on {}", config.endpoint))?;
        StreamingServer::spawn(listener, identification, check_builder, registry.clone())
    } else {
        let settings = ClientSettings {
            identification,
            reconnect_delay: config.reconnect_delay(),
        };
        StreamingClient::spawn(
            TcpConnector::new(config.endpoint.clone()),
            settings,
            check_builder,
            registry.clone(),
        )
    };

    tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
    info!("Shutdown requested");

    handle.stop().await;
    registry.shutdown_all();
    // the drive size worker blocks while joining its thread
    tokio::task::spawn_blocking(move || builder.shutdown())
        .await
        .context("Drive size worker shutdown failed")?;

    info!("Vigil Agent stopped");
    Ok(())
}
