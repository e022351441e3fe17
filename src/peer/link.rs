//! Peer Links
//!
//! A `PeerLink` is the reliable, ordered text channel between the two peers
//! once establishment succeeded. Transport backends (a WebRTC data channel,
//! an in-process pipe) feed it through a pair of unbounded queues.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::id::SessionId;

/// Link errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The link or the remote end is closed.
    #[error("link closed")]
    Closed,
}

/// The raw queue ends a transport backend hands over when its channel opens.
#[derive(Debug)]
pub struct Channel {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl Channel {
    /// Wrap queue ends produced by a backend.
    pub fn new(
        outgoing: mpsc::UnboundedSender<String>,
        incoming: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self { outgoing, incoming }
    }

    /// Two channel ends wired back to back.
    pub fn pair() -> (Channel, Channel) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Channel::new(a_tx, a_rx), Channel::new(b_tx, b_rx))
    }
}

/// An open direct channel to the remote peer.
#[derive(Debug)]
pub struct PeerLink {
    session_id: SessionId,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl PeerLink {
    /// Wrap an open channel.
    pub fn new(session_id: SessionId, channel: Channel) -> Self {
        Self {
            session_id,
            outgoing: Some(channel.outgoing),
            incoming: channel.incoming,
        }
    }

    /// Two in-process links connected to each other.
    pub fn pair(session_id: SessionId) -> (PeerLink, PeerLink) {
        let (a, b) = Channel::pair();
        (PeerLink::new(session_id.clone(), a), PeerLink::new(session_id, b))
    }

    /// Session that produced this link.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Send one text message.
    pub fn send(&mut self, text: String) -> Result<(), LinkError> {
        let outgoing = self.outgoing.as_ref().ok_or(LinkError::Closed)?;
        if outgoing.send(text).is_err() {
            self.close();
            return Err(LinkError::Closed);
        }
        Ok(())
    }

    /// Wait for the next message. `None` once the remote end closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next message if one is already buffered.
    pub fn try_recv(&mut self) -> Result<Option<String>, LinkError> {
        match self.incoming.try_recv() {
            Ok(text) => Ok(Some(text)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(LinkError::Closed),
        }
    }

    /// Close both directions. The remote observes end-of-stream.
    pub fn close(&mut self) {
        self.outgoing = None;
        self.incoming.close();
    }

    /// Whether this side closed the link.
    pub fn is_closed(&self) -> bool {
        self.outgoing.is_none()
    }
}
