//! WebSocket Signaling Relay
//!
//! Async WebSocket server that pairs clients into sessions and forwards
//! handshake payloads between them. It never looks inside descriptions or
//! candidates.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::network::config::RelayConfig;
use crate::network::protocol::{ClientFrame, ServerFrame};
use crate::network::session::{ClientId, Outbound, SessionRegistry};

/// Shortest sweep period. Configured values below this are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Remote address.
    addr: SocketAddr,
    /// Connection time.
    connected_at: Instant,
}

/// The signaling relay.
pub struct RelayServer {
    /// Relay configuration.
    config: RelayConfig,
    /// Session registry.
    sessions: Arc<SessionRegistry>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<ClientId, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay.
    pub fn new(config: RelayConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let sessions = Arc::new(SessionRegistry::new(config.id_length, config.session_ttl));

        Self {
            config,
            sessions,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayServerError> {
        info!("Relay listening on {}", listener.local_addr()?);

        let sweep_sessions = self.sessions.clone();
        let sweep_every = self.config.sweep_interval;
        let sweep_handle = tokio::spawn(async move {
            Self::run_sweep_loop(sweep_sessions, sweep_every).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        sweep_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let sessions = self.sessions.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let client = ClientId::new();
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

            clients.write().await.insert(client, ConnectedClient {
                addr,
                connected_at: Instant::now(),
            });
            info!("Client {} connected from {}", client, addr);

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                Self::handle_client_text(client, &text, &sessions, &config, &out_tx).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", client);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", client, e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                    out = out_rx.recv() => {
                        match out {
                            Some(Outbound::Frame(text)) => {
                                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                                    warn!("Failed to send to {}: {}", client, e);
                                    break;
                                }
                            }
                            Some(Outbound::Close) | None => {
                                let _ = ws_sender.send(Message::Close(None)).await;
                                debug!("Closed client {}", client);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            // Cleanup
            sessions.leave(client).await;
            if let Some(entry) = clients.write().await.remove(&client) {
                info!(
                    "Client {} ({}) cleaned up after {:?}",
                    client,
                    entry.addr,
                    entry.connected_at.elapsed()
                );
            }
        });
    }

    /// Handle one text frame. Malformed or refused frames are logged and dropped.
    async fn handle_client_text(
        client: ClientId,
        text: &str,
        sessions: &Arc<SessionRegistry>,
        config: &RelayConfig,
        sender: &mpsc::UnboundedSender<Outbound>,
    ) {
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Invalid frame from {}: {}", client, e);
                return;
            }
        };

        match frame {
            ClientFrame::RequestSessionId => {
                let id = sessions.create_session().await;
                let _ = sender.send(Outbound::Frame(id.to_string()));
            }
            ClientFrame::JoinSession(id) => {
                if let Err(e) = sessions.join(client, sender.clone(), &id).await {
                    warn!("Client {} could not join: {}", client, e);
                }
            }
            ClientFrame::Signal(signal) => {
                if let Err(e) = sessions.relay(client, &signal, text).await {
                    warn!("Dropped signal from {}: {}", client, e);
                }
            }
            ClientFrame::RequestIceServers => {
                match ServerFrame::IceServers(config.ice_servers.clone()).encode() {
                    Ok(text) => {
                        let _ = sender.send(Outbound::Frame(text));
                    }
                    Err(e) => error!("Failed to serialize ICE servers: {}", e),
                }
            }
        }
    }

    /// Periodically force-close sessions that outlived their TTL.
    async fn run_sweep_loop(sessions: Arc<SessionRegistry>, every: Duration) {
        let mut interval = interval(every.max(MIN_SWEEP_INTERVAL));

        loop {
            interval.tick().await;

            let expired = sessions.sweep_expired(Instant::now()).await;
            if !expired.is_empty() {
                debug!("Sweep closed {} session(s)", expired.len());
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.session_count().await
    }
}
