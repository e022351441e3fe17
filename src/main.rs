//! Wordlink Relay
//!
//! Signaling relay for Wordlink peers. Configured from the environment
//! (`RELAY_PORT`, `RELAY_SESSION_TTL_MS`, ...), logging via `RUST_LOG`.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wordlink::{network::RelayConfig, RelayServer, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RelayConfig::from_env();
    info!("Wordlink Relay v{}", VERSION);
    info!("Session TTL: {:?}, id length: {}", config.session_ttl, config.id_length);
    info!("ICE servers: {}", config.ice_servers.len());

    let server = Arc::new(RelayServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
