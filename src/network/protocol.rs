//! Relay Wire Frames
//!
//! Text frames exchanged with the signaling relay over WebSocket.
//! Multi-part frames put the tag on the first line and fields on the
//! following lines. The last field of a frame may itself contain newlines
//! (session descriptions do).

use thiserror::Error;

use crate::core::id::SessionId;
use crate::network::config::IceServer;

const REQUEST_SESSION_ID: &str = "RequestSessionId";
const JOIN_SESSION: &str = "JoinSession";
const CLIENT_JOIN: &str = "ClientJoin";
const DESCRIPTION: &str = "Description";
const ICE_CANDIDATE: &str = "IceCandidate";
const COMPLETE: &str = "Complete";
const REQUEST_ICE_SERVERS: &str = "RequestIceServers";
const ICE_SERVERS: &str = "IceServers";

/// Frame parse errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Empty frame.
    #[error("empty frame")]
    Empty,
    /// Tag is not a known frame kind.
    #[error("unknown frame kind {0:?}")]
    UnknownKind(String),
    /// A required field line is missing.
    #[error("{kind} frame is missing field {field}")]
    MissingField {
        /// Frame kind.
        kind: &'static str,
        /// Missing field.
        field: &'static str,
    },
    /// Embedded JSON failed to parse.
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// RELAYED SIGNALS
// =============================================================================

/// Handshake payloads the relay forwards verbatim between session members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Offer or answer session description.
    Description(String),
    /// A discovered ICE candidate.
    IceCandidate {
        /// Media line identifier.
        mid: String,
        /// Candidate string.
        candidate: String,
    },
    /// No more candidates from the sender.
    Complete,
}

impl Signal {
    /// Serialize to wire text.
    pub fn encode(&self) -> String {
        match self {
            Signal::Description(sdp) => format!("{}\n{}", DESCRIPTION, sdp),
            Signal::IceCandidate { mid, candidate } => {
                format!("{}\n{}\n{}", ICE_CANDIDATE, mid, candidate)
            }
            Signal::Complete => COMPLETE.to_string(),
        }
    }

    fn parse_tagged(tag: &str, rest: Option<&str>) -> Result<Option<Self>, FrameError> {
        let signal = match tag {
            DESCRIPTION => Signal::Description(
                rest.ok_or(FrameError::MissingField { kind: DESCRIPTION, field: "sdp" })?
                    .to_string(),
            ),
            ICE_CANDIDATE => {
                let rest = rest.ok_or(FrameError::MissingField { kind: ICE_CANDIDATE, field: "mid" })?;
                let (mid, candidate) = rest
                    .split_once('\n')
                    .ok_or(FrameError::MissingField { kind: ICE_CANDIDATE, field: "candidate" })?;
                Signal::IceCandidate {
                    mid: mid.to_string(),
                    candidate: candidate.to_string(),
                }
            }
            COMPLETE => Signal::Complete,
            _ => return Ok(None),
        };
        Ok(Some(signal))
    }
}

// =============================================================================
// CLIENT -> RELAY
// =============================================================================

/// Frames sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Create a new session and return its id.
    RequestSessionId,
    /// Join an existing session.
    JoinSession(SessionId),
    /// Forward a handshake payload to the other member.
    Signal(Signal),
    /// Ask for the configured ICE servers.
    RequestIceServers,
}

impl ClientFrame {
    /// Serialize to wire text.
    pub fn encode(&self) -> String {
        match self {
            ClientFrame::RequestSessionId => REQUEST_SESSION_ID.to_string(),
            ClientFrame::JoinSession(id) => format!("{}\n{}", JOIN_SESSION, id),
            ClientFrame::Signal(signal) => signal.encode(),
            ClientFrame::RequestIceServers => REQUEST_ICE_SERVERS.to_string(),
        }
    }

    /// Parse from wire text.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let (tag, rest) = split_tag(text)?;
        match tag {
            REQUEST_SESSION_ID => Ok(ClientFrame::RequestSessionId),
            REQUEST_ICE_SERVERS => Ok(ClientFrame::RequestIceServers),
            JOIN_SESSION => {
                let id = rest.ok_or(FrameError::MissingField { kind: JOIN_SESSION, field: "id" })?;
                Ok(ClientFrame::JoinSession(SessionId::from_wire(id.trim())))
            }
            _ => Signal::parse_tagged(tag, rest)?
                .map(ClientFrame::Signal)
                .ok_or_else(|| FrameError::UnknownKind(tag.to_string())),
        }
    }
}

// =============================================================================
// RELAY -> CLIENT
// =============================================================================

/// Frames sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Reply to `RequestSessionId`: the bare id.
    SessionId(SessionId),
    /// Another client joined this client's session.
    ClientJoin,
    /// A payload forwarded from the other member.
    Signal(Signal),
    /// Reply to `RequestIceServers`.
    IceServers(Vec<IceServer>),
}

impl ServerFrame {
    /// Serialize to wire text.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(match self {
            ServerFrame::SessionId(id) => id.to_string(),
            ServerFrame::ClientJoin => CLIENT_JOIN.to_string(),
            ServerFrame::Signal(signal) => signal.encode(),
            ServerFrame::IceServers(servers) => {
                format!("{}\n{}", ICE_SERVERS, serde_json::to_string(servers)?)
            }
        })
    }

    /// Parse from wire text.
    ///
    /// A single line that is not a known tag is the session id reply.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let (tag, rest) = split_tag(text)?;
        match tag {
            CLIENT_JOIN => Ok(ServerFrame::ClientJoin),
            ICE_SERVERS => {
                let body = rest.ok_or(FrameError::MissingField { kind: ICE_SERVERS, field: "servers" })?;
                Ok(ServerFrame::IceServers(serde_json::from_str(body)?))
            }
            _ => match Signal::parse_tagged(tag, rest)? {
                Some(signal) => Ok(ServerFrame::Signal(signal)),
                None if rest.is_none() => Ok(ServerFrame::SessionId(SessionId::from_wire(tag))),
                None => Err(FrameError::UnknownKind(tag.to_string())),
            },
        }
    }
}

fn split_tag(text: &str) -> Result<(&str, Option<&str>), FrameError> {
    if text.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(match text.split_once('\n') {
        Some((tag, rest)) => (tag.trim_end_matches('\r'), Some(rest)),
        None => (text.trim_end_matches('\r'), None),
    })
}
