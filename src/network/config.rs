//! Relay Configuration
//!
//! Defaults suit local development; production deployments override them
//! through environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::id::DEFAULT_ID_LENGTH;

/// An ICE server descriptor handed to clients opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// STUN/TURN urls.
    pub urls: Vec<String>,
    /// Optional TURN username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Optional TURN credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Relay process configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Sessions older than this are force-closed.
    pub session_ttl: Duration,
    /// How often expired sessions are swept.
    pub sweep_interval: Duration,
    /// Generated session id length.
    pub id_length: usize,
    /// ICE servers handed to clients on request.
    pub ice_servers: Vec<IceServer>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            session_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(1),
            id_length: DEFAULT_ID_LENGTH,
            ice_servers: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Create config from environment variables.
    ///
    /// Unset variables keep their defaults; unparseable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(bind) = parsed::<SocketAddr>(&lookup, "RELAY_BIND") {
            config.bind_addr = bind;
        }
        if let Some(port) = parsed::<u16>(&lookup, "RELAY_PORT") {
            config.bind_addr.set_port(port);
        }
        if let Some(ttl_ms) = parsed::<u64>(&lookup, "RELAY_SESSION_TTL_MS") {
            config.session_ttl = Duration::from_millis(ttl_ms);
        }
        if let Some(len) = parsed::<usize>(&lookup, "RELAY_ID_LENGTH") {
            if len == 0 {
                warn!("RELAY_ID_LENGTH must be positive, keeping {}", config.id_length);
            } else {
                config.id_length = len;
            }
        }
        if let Some(max) = parsed::<usize>(&lookup, "RELAY_MAX_CONNECTIONS") {
            config.max_connections = max;
        }
        if let Some(raw) = lookup("RELAY_ICE_SERVERS") {
            match serde_json::from_str::<Vec<IceServer>>(&raw) {
                Ok(servers) => config.ice_servers = servers,
                Err(e) => warn!("Ignoring RELAY_ICE_SERVERS: {}", e),
            }
        }

        config
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
