//! Connection Establishment
//!
//! Drives the offer/answer/candidate exchange through the signaling relay
//! until a direct data channel opens. The WebRTC stack itself sits behind
//! the `PeerConnection` trait so any backend can be plugged in.
//!
//! ```text
//! host                         relay                        joiner
//!  |-- RequestSessionId ------->|                             |
//!  |<------------------- id ----|                             |
//!  |-- JoinSession id --------->|<--------- JoinSession id ---|
//!  |<------------- ClientJoin --|                             |
//!  |-- Description (offer) ---->|---------------------------->|
//!  |<---------------------------|<------ Description (answer)-|
//!  |<=========== IceCandidate* / Complete both ways ========>|
//!  |============== data channel opens, relay released ======|
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::core::id::{SessionId, SessionIdError, DEFAULT_ID_LENGTH};
use crate::network::config::IceServer;
use crate::network::protocol::{ClientFrame, FrameError, ServerFrame, Signal};
use crate::peer::link::{Channel, PeerLink};

/// Label of the single data channel the host creates.
pub const DATA_CHANNEL_LABEL: &str = "wordlink";

/// Establishment errors.
#[derive(Debug, Error)]
pub enum EstablishError {
    /// Session id failed validation. No network activity happened.
    #[error("invalid session id: {0}")]
    InvalidSessionId(#[from] SessionIdError),
    /// WebSocket failure talking to the relay.
    #[error("relay connection failed: {0}")]
    Relay(#[from] tokio_tungstenite::tungstenite::Error),
    /// Relay sent an unreadable frame.
    #[error("bad relay frame: {0}")]
    Frame(#[from] FrameError),
    /// Relay closed before the handshake finished.
    #[error("relay closed the connection")]
    RelayClosed,
    /// Relay answered with the wrong frame.
    #[error("unexpected relay reply: {0}")]
    UnexpectedReply(String),
    /// ICE negotiation failed.
    #[error("ICE negotiation failed: {0}")]
    Ice(String),
    /// Peer connection closed before the channel opened.
    #[error("peer connection closed: {0}")]
    ChannelClosed(String),
    /// Backend-specific failure.
    #[error("peer connection error: {0}")]
    Peer(String),
}

// =============================================================================
// PEER CONNECTION BACKEND
// =============================================================================

/// A network candidate exchanged during establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// Media line identifier.
    pub mid: String,
    /// Candidate string.
    pub candidate: String,
}

/// Asynchronous notifications from a peer connection.
#[derive(Debug)]
pub enum PeerEvent {
    /// A local candidate was discovered.
    LocalCandidate(IceCandidate),
    /// Local candidate gathering finished.
    GatheringComplete,
    /// The data channel is open.
    ChannelOpen(Channel),
    /// The connection closed.
    Closed(String),
    /// ICE negotiation failed.
    Failed(String),
}

/// A WebRTC-style peer connection.
#[async_trait]
pub trait PeerConnection: Send {
    /// Create the ordered reliable data channel (host only).
    async fn create_data_channel(&mut self, label: &str) -> Result<(), EstablishError>;

    /// Create an offer description.
    async fn create_offer(&mut self) -> Result<String, EstablishError>;

    /// Create an answer to the current remote offer.
    async fn create_answer(&mut self) -> Result<String, EstablishError>;

    /// Apply a local description. Starts candidate gathering.
    async fn set_local_description(&mut self, sdp: &str) -> Result<(), EstablishError>;

    /// Apply the remote description.
    async fn set_remote_description(&mut self, sdp: &str) -> Result<(), EstablishError>;

    /// Add a remote candidate.
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), EstablishError>;

    /// Next event. `None` once the connection is gone.
    async fn next_event(&mut self) -> Option<PeerEvent>;
}

// =============================================================================
// RELAY CLIENT
// =============================================================================

/// WebSocket client for the signaling relay.
pub struct RelayClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayClient {
    /// Connect to a relay URL.
    pub async fn connect(url: &str) -> Result<Self, EstablishError> {
        let (ws, _) = connect_async(url).await?;
        debug!("Connected to relay {}", url);
        Ok(Self { ws })
    }

    /// Send one frame.
    pub async fn send(&mut self, frame: &ClientFrame) -> Result<(), EstablishError> {
        self.ws.send(Message::Text(frame.encode())).await?;
        Ok(())
    }

    /// Next frame. `None` once the relay closed the socket.
    pub async fn recv(&mut self) -> Result<Option<ServerFrame>, EstablishError> {
        while let Some(msg) = self.ws.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(ServerFrame::parse(&text)?)),
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Create a session on the relay.
    pub async fn request_session_id(&mut self) -> Result<SessionId, EstablishError> {
        self.send(&ClientFrame::RequestSessionId).await?;
        match self.recv().await? {
            Some(ServerFrame::SessionId(id)) => Ok(id),
            Some(other) => Err(EstablishError::UnexpectedReply(format!("{:?}", other))),
            None => Err(EstablishError::RelayClosed),
        }
    }

    /// Join a session. The relay does not acknowledge.
    pub async fn join(&mut self, id: &SessionId) -> Result<(), EstablishError> {
        self.send(&ClientFrame::JoinSession(id.clone())).await
    }

    /// Fetch the ICE servers configured on the relay.
    pub async fn ice_servers(&mut self) -> Result<Vec<IceServer>, EstablishError> {
        self.send(&ClientFrame::RequestIceServers).await?;
        match self.recv().await? {
            Some(ServerFrame::IceServers(servers)) => Ok(servers),
            Some(other) => Err(EstablishError::UnexpectedReply(format!("{:?}", other))),
            None => Err(EstablishError::RelayClosed),
        }
    }

    /// Close the socket.
    pub async fn close(mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!("Relay close failed: {}", e);
        }
    }

    async fn signal(&mut self, signal: Signal) -> Result<(), EstablishError> {
        self.send(&ClientFrame::Signal(signal)).await
    }
}

// =============================================================================
// HOST / JOIN
// =============================================================================

/// A hosted session waiting for its peer.
pub struct PendingHost<P> {
    relay: RelayClient,
    peer: P,
    session_id: SessionId,
}

/// Host a new session.
///
/// Returns once the relay assigned an id. Share `session_id()` with the
/// other player, then await `connect()`.
pub async fn host<P: PeerConnection>(
    relay_url: &str,
    peer: P,
) -> Result<PendingHost<P>, EstablishError> {
    host_on(RelayClient::connect(relay_url).await?, peer).await
}

/// Host a new session over an already connected relay client.
pub async fn host_on<P: PeerConnection>(
    mut relay: RelayClient,
    mut peer: P,
) -> Result<PendingHost<P>, EstablishError> {
    let session_id = relay.request_session_id().await?;
    relay.join(&session_id).await?;
    peer.create_data_channel(DATA_CHANNEL_LABEL).await?;
    info!("Hosting session {}", session_id);
    Ok(PendingHost {
        relay,
        peer,
        session_id,
    })
}

impl<P: PeerConnection> PendingHost<P> {
    /// Id to share with the other player.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Wait for the joiner and complete the handshake.
    pub async fn connect(self) -> Result<PeerLink, EstablishError> {
        let PendingHost {
            mut relay,
            mut peer,
            session_id,
        } = self;

        loop {
            match relay.recv().await? {
                Some(ServerFrame::ClientJoin) => break,
                Some(other) => debug!("Ignoring {:?} while waiting for joiner", other),
                None => return Err(EstablishError::RelayClosed),
            }
        }
        info!("Peer joined session {}", session_id);

        let offer = peer.create_offer().await?;
        peer.set_local_description(&offer).await?;
        relay.signal(Signal::Description(offer)).await?;

        let mut early = Vec::new();
        let mut remote_complete = false;
        loop {
            match relay.recv().await? {
                Some(ServerFrame::Signal(Signal::Description(answer))) => {
                    peer.set_remote_description(&answer).await?;
                    break;
                }
                Some(ServerFrame::Signal(Signal::IceCandidate { mid, candidate })) => {
                    early.push(IceCandidate { mid, candidate });
                }
                Some(ServerFrame::Signal(Signal::Complete)) => remote_complete = true,
                Some(other) => debug!("Ignoring {:?} while waiting for answer", other),
                None => return Err(EstablishError::RelayClosed),
            }
        }

        exchange(relay, peer, session_id, early, remote_complete).await
    }
}

/// Join a session by id.
///
/// The id is validated before any network activity.
pub async fn join<P: PeerConnection>(
    relay_url: &str,
    session_id: &str,
    peer: P,
) -> Result<PeerLink, EstablishError> {
    join_with_len(relay_url, session_id, DEFAULT_ID_LENGTH, peer).await
}

/// Join a session on a relay that hands out ids of `id_length` letters.
pub async fn join_with_len<P: PeerConnection>(
    relay_url: &str,
    session_id: &str,
    id_length: usize,
    peer: P,
) -> Result<PeerLink, EstablishError> {
    let id = SessionId::parse_with_len(session_id, id_length)?;
    join_on(RelayClient::connect(relay_url).await?, id, peer).await
}

/// Join a session over an already connected relay client.
pub async fn join_on<P: PeerConnection>(
    mut relay: RelayClient,
    session_id: SessionId,
    mut peer: P,
) -> Result<PeerLink, EstablishError> {
    relay.join(&session_id).await?;
    info!("Joining session {}", session_id);

    let mut early = Vec::new();
    let mut remote_complete = false;
    loop {
        match relay.recv().await? {
            Some(ServerFrame::Signal(Signal::Description(offer))) => {
                peer.set_remote_description(&offer).await?;
                let answer = peer.create_answer().await?;
                peer.set_local_description(&answer).await?;
                relay.signal(Signal::Description(answer)).await?;
                break;
            }
            Some(ServerFrame::Signal(Signal::IceCandidate { mid, candidate })) => {
                early.push(IceCandidate { mid, candidate });
            }
            Some(ServerFrame::Signal(Signal::Complete)) => remote_complete = true,
            Some(other) => debug!("Ignoring {:?} while waiting for offer", other),
            None => return Err(EstablishError::RelayClosed),
        }
    }

    exchange(relay, peer, session_id, early, remote_complete).await
}

/// Trade candidates until the data channel opens.
///
/// Candidates that arrived before the remote description are applied first.
async fn exchange<P: PeerConnection>(
    mut relay: RelayClient,
    mut peer: P,
    session_id: SessionId,
    early: Vec<IceCandidate>,
    mut remote_complete: bool,
) -> Result<PeerLink, EstablishError> {
    for candidate in early {
        peer.add_ice_candidate(candidate).await?;
    }

    let mut local_complete = false;
    let mut relay_open = true;

    loop {
        tokio::select! {
            frame = relay.recv(), if relay_open => match frame {
                Ok(Some(ServerFrame::Signal(Signal::IceCandidate { mid, candidate }))) => {
                    peer.add_ice_candidate(IceCandidate { mid, candidate }).await?;
                }
                Ok(Some(ServerFrame::Signal(Signal::Complete))) => remote_complete = true,
                Ok(Some(other)) => debug!("Ignoring {:?} during candidate exchange", other),
                Ok(None) => {
                    debug!("Relay released session {}", session_id);
                    relay_open = false;
                }
                Err(e) => {
                    warn!("Relay failed during candidate exchange: {}", e);
                    relay_open = false;
                }
            },
            event = peer.next_event() => match event {
                Some(PeerEvent::LocalCandidate(c)) => {
                    if relay_open {
                        relay
                            .signal(Signal::IceCandidate { mid: c.mid, candidate: c.candidate })
                            .await?;
                    }
                }
                Some(PeerEvent::GatheringComplete) => {
                    local_complete = true;
                    if relay_open {
                        relay.signal(Signal::Complete).await?;
                    }
                }
                Some(PeerEvent::ChannelOpen(channel)) => {
                    info!(
                        "Data channel open for session {} (candidates complete: local={}, remote={})",
                        session_id, local_complete, remote_complete
                    );
                    if relay_open {
                        relay.close().await;
                    }
                    return Ok(PeerLink::new(session_id, channel));
                }
                Some(PeerEvent::Failed(reason)) => return Err(EstablishError::Ice(reason)),
                Some(PeerEvent::Closed(reason)) => return Err(EstablishError::ChannelClosed(reason)),
                None => return Err(EstablishError::ChannelClosed("connection dropped".to_string())),
            },
        }
    }
}
