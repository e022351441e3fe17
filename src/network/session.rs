//! Relay Session Management
//!
//! Owns every pairing session the relay knows about. A session holds at most
//! two member connections and lives until it empties, its members both finish
//! the handshake, or its TTL runs out.
//!
//! Locking: the session map is only held long enough to look up or insert an
//! `Arc`; all member mutations happen under the per-session lock, so sessions
//! with different ids never contend. A session being torn down is flagged
//! `closed` under its own lock before it leaves the map.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::id::SessionId;
use crate::network::protocol::{ServerFrame, Signal};

/// Maximum members in one session.
pub const MAX_MEMBERS: usize = 2;

/// Relay-side connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Allocate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First block is enough to tell connections apart in logs.
        let s = self.0.to_string();
        f.write_str(&s[..8])
    }
}

/// Commands delivered to a connection's socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send a text frame.
    Frame(String),
    /// Close the socket.
    Close,
}

/// Relay-local faults. None of these affect other sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// No open session with this id.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// Session already has two members.
    #[error("session {0} is full")]
    SessionFull(SessionId),

    /// Connection has not joined a session.
    #[error("connection is not in a session")]
    NotInSession,
}

/// A session member.
#[derive(Debug)]
struct Member {
    client: ClientId,
    sender: mpsc::UnboundedSender<Outbound>,
    complete: bool,
}

/// A pairing session.
#[derive(Debug)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    members: Vec<Member>,
    created_at: Instant,
    closed: bool,
}

impl Session {
    /// Create an empty session.
    pub fn new(id: SessionId, created_at: Instant) -> Self {
        Self {
            id,
            members: Vec::with_capacity(MAX_MEMBERS),
            created_at,
            closed: false,
        }
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check membership.
    pub fn contains(&self, client: ClientId) -> bool {
        self.members.iter().any(|m| m.client == client)
    }

    /// Whether the session outlived `ttl` at `now`.
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }

    /// Whether every member has sent `Complete`.
    pub fn all_complete(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.complete)
    }

    fn remove_member(&mut self, client: ClientId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.client != client);
        self.members.len() != before
    }

    /// Send a frame to every member except `from`. Returns recipients.
    fn forward(&self, from: ClientId, text: &str) -> usize {
        let mut delivered = 0;
        for member in self.members.iter().filter(|m| m.client != from) {
            if member.sender.send(Outbound::Frame(text.to_string())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    fn mark_complete(&mut self, client: ClientId) {
        if let Some(member) = self.members.iter_mut().find(|m| m.client == client) {
            member.complete = true;
        }
    }

    /// Close every member socket and flag the session closed.
    fn close_all(&mut self) -> Vec<ClientId> {
        self.closed = true;
        self.members
            .drain(..)
            .map(|m| {
                let _ = m.sender.send(Outbound::Close);
                m.client
            })
            .collect()
    }
}

/// Result of relaying one handshake payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Members the payload was delivered to.
    pub forwarded_to: usize,
    /// The session completed its handshake and was torn down.
    pub session_finished: bool,
}

// =============================================================================
// SESSION REGISTRY
// =============================================================================

/// Owns all sessions of one relay process.
pub struct SessionRegistry {
    /// Open sessions.
    sessions: RwLock<BTreeMap<SessionId, Arc<RwLock<Session>>>>,
    /// Connection to session mapping.
    memberships: RwLock<BTreeMap<ClientId, SessionId>>,
    /// Generated id length.
    id_length: usize,
    /// Session time-to-live.
    ttl: Duration,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(id_length: usize, ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            memberships: RwLock::new(BTreeMap::new()),
            id_length,
            ttl,
        }
    }

    /// Create a new empty session with an id unique among open sessions.
    pub async fn create_session(&self) -> SessionId {
        let mut sessions = self.sessions.write().await;
        let id = loop {
            let candidate = SessionId::generate(self.id_length);
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
            debug!("Session id {} collided, regenerating", candidate);
        };
        sessions.insert(
            id.clone(),
            Arc::new(RwLock::new(Session::new(id.clone(), Instant::now()))),
        );
        info!("Created session {}", id);
        id
    }

    /// Get a session by id.
    pub async fn get_session(&self, id: &SessionId) -> Option<Arc<RwLock<Session>>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Session a connection currently belongs to.
    pub async fn session_of(&self, client: ClientId) -> Option<SessionId> {
        self.memberships.read().await.get(&client).cloned()
    }

    /// Join `client` to session `id`.
    ///
    /// The target is checked and joined under its own lock; only after that
    /// succeeds is any previous membership of `client` dropped, so a rejected
    /// join leaves the client where it was. The other member, if any, is sent
    /// `ClientJoin`. Returns the new member count.
    pub async fn join(
        &self,
        client: ClientId,
        sender: mpsc::UnboundedSender<Outbound>,
        id: &SessionId,
    ) -> Result<usize, RelayError> {
        let target = self
            .get_session(id)
            .await
            .ok_or_else(|| RelayError::SessionNotFound(id.clone()))?;

        let count = {
            let mut session = target.write().await;
            if session.closed {
                return Err(RelayError::SessionNotFound(id.clone()));
            }
            if !session.contains(client) && session.member_count() >= MAX_MEMBERS {
                return Err(RelayError::SessionFull(id.clone()));
            }
            // Rejoining the same session replaces the stale entry.
            session.remove_member(client);
            session.members.push(Member {
                client,
                sender,
                complete: false,
            });
            session.forward(client, &ServerFrame::ClientJoin.encode().unwrap_or_default());
            session.member_count()
        };

        if let Some(previous) = self.session_of(client).await {
            if &previous != id {
                self.detach(client, &previous).await;
            }
        }

        self.memberships.write().await.insert(client, id.clone());
        info!("Client {} joined session {} ({} members)", client, id, count);
        Ok(count)
    }

    /// Forward a handshake payload from `client` to the rest of its session.
    ///
    /// `text` is forwarded verbatim. When every member has sent `Complete`,
    /// all member sockets are closed and the session is removed.
    pub async fn relay(
        &self,
        client: ClientId,
        signal: &Signal,
        text: &str,
    ) -> Result<RelayOutcome, RelayError> {
        let id = self.session_of(client).await.ok_or(RelayError::NotInSession)?;
        let session = self
            .get_session(&id)
            .await
            .ok_or_else(|| RelayError::SessionNotFound(id.clone()))?;

        let (forwarded_to, finished) = {
            let mut session = session.write().await;
            if session.closed {
                return Err(RelayError::SessionNotFound(id));
            }
            let forwarded_to = session.forward(client, text);
            let mut finished = None;
            if matches!(signal, Signal::Complete) {
                session.mark_complete(client);
                if session.all_complete() {
                    finished = Some(session.close_all());
                }
            }
            (forwarded_to, finished)
        };

        debug!("Relayed {} bytes from {} to {} member(s)", text.len(), client, forwarded_to);

        let session_finished = match finished {
            Some(clients) => {
                info!("Session {} completed its handshake", id);
                self.discard(&id, &clients).await;
                true
            }
            None => false,
        };

        Ok(RelayOutcome { forwarded_to, session_finished })
    }

    /// Remove `client` from its session. Empty sessions are deleted.
    pub async fn leave(&self, client: ClientId) -> Option<SessionId> {
        let id = self.memberships.write().await.remove(&client)?;
        self.detach(client, &id).await;
        Some(id)
    }

    /// Drop `client` from session `id`, deleting the session if it empties.
    async fn detach(&self, client: ClientId, id: &SessionId) {
        let Some(session) = self.get_session(id).await else {
            return;
        };

        let emptied = {
            let mut session = session.write().await;
            session.remove_member(client);
            if session.members.is_empty() && !session.closed {
                session.closed = true;
                true
            } else {
                false
            }
        };

        if emptied {
            self.sessions.write().await.remove(id);
            info!("Session {} is empty, removed", id);
        }
    }

    /// Force-close every session older than the TTL at `now`.
    ///
    /// Returns the ids of the sessions that were closed.
    pub async fn sweep_expired(&self, now: Instant) -> Vec<SessionId> {
        let snapshot: Vec<(SessionId, Arc<RwLock<Session>>)> = {
            let sessions = self.sessions.read().await;
            sessions.iter().map(|(id, s)| (id.clone(), s.clone())).collect()
        };

        let mut expired = Vec::new();
        for (id, session) in snapshot {
            let closed = {
                let mut session = session.write().await;
                if !session.closed && session.is_expired(now, self.ttl) {
                    Some(session.close_all())
                } else {
                    None
                }
            };
            if let Some(clients) = closed {
                warn!("Session {} exceeded its TTL, closing {} member(s)", id, clients.len());
                self.discard(&id, &clients).await;
                expired.push(id);
            }
        }
        expired
    }

    /// Member count of a session, if it exists.
    pub async fn member_count(&self, id: &SessionId) -> Option<usize> {
        let session = self.get_session(id).await?;
        let session = session.read().await;
        Some(session.member_count())
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn discard(&self, id: &SessionId, clients: &[ClientId]) {
        self.sessions.write().await.remove(id);
        let mut memberships = self.memberships.write().await;
        for client in clients {
            if memberships.get(client) == Some(id) {
                memberships.remove(client);
            }
        }
    }
}
