//! Peer Message Protocol
//!
//! A typed message layer over a `PeerLink`. Each side registers message
//! names with a schema and a handler, then finishes registration. Every
//! registration is announced as `ProtocolAdd <name> <json-sample>` and the
//! end of registration as `ProtocolFinish`. Application frames are
//! `<name> <json-payload>`.
//!
//! Once both sides finished, the remote announcements are checked against
//! the local schemas and messages sent before that point are flushed in
//! FIFO order. Any violation closes the link: the other peer is untrusted.

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::peer::link::{LinkError, PeerLink};
use crate::peer::schema::Schema;

/// Control frame announcing one registration.
pub const PROTOCOL_ADD: &str = "ProtocolAdd";
/// Control frame ending registration.
pub const PROTOCOL_FINISH: &str = "ProtocolFinish";

/// Peer protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Name is empty or contains whitespace.
    #[error("invalid message name {0:?}")]
    InvalidName(String),
    /// Name collides with a control frame.
    #[error("message name {0:?} is reserved")]
    ReservedName(String),
    /// Name already registered locally.
    #[error("message {0:?} is already registered")]
    DuplicateName(String),
    /// Registration attempted after `finish_local`.
    #[error("registration of {0:?} after finishing")]
    RegistrationClosed(String),
    /// `finish_local` called twice.
    #[error("local registration already finished")]
    AlreadyFinished,
    /// Remote announced a name after finishing.
    #[error("remote registered {0:?} after finishing")]
    RemoteRegistrationClosed(String),
    /// Remote finished twice.
    #[error("remote finished registration twice")]
    RemoteAlreadyFinished,
    /// Remote announced a name unknown locally or with a different shape.
    #[error("remote schema for {0:?} does not match")]
    SchemaMismatch(String),
    /// Message name not registered.
    #[error("unknown message {0:?}")]
    UnknownMessage(String),
    /// Payload does not match the registered schema.
    #[error("payload for {0:?} does not match its schema")]
    ShapeMismatch(String),
    /// Application frame arrived before both sides finished.
    #[error("message {0:?} arrived before registration finished")]
    NotReady(String),
    /// Frame is not `<name> <json>`.
    #[error("malformed frame {0:?}")]
    MalformedFrame(String),
    /// A handler rejected a well-formed payload.
    #[error("handler for {name:?} rejected payload: {reason}")]
    Rejected {
        /// Message name.
        name: String,
        /// Reason given by the handler.
        reason: String,
    },
    /// JSON failed to parse or serialize.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The link is closed.
    #[error("link closed")]
    Closed,
}

impl From<LinkError> for ProtocolError {
    fn from(_: LinkError) -> Self {
        ProtocolError::Closed
    }
}

/// Messages a handler wants sent in reaction to a payload.
#[derive(Debug, Default)]
pub struct Replies {
    queued: Vec<(String, Value)>,
}

impl Replies {
    /// Queue a reply, sent after the handler returns.
    pub fn send(&mut self, name: impl Into<String>, payload: Value) {
        self.queued.push((name.into(), payload));
    }

    /// Whether nothing was queued.
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }
}

/// Receives validated payloads of one message name.
pub trait MessageHandler: Send {
    /// Handle a payload that already matched the schema.
    ///
    /// Returning an error is a protocol violation and closes the link.
    fn handle(&mut self, payload: Value, replies: &mut Replies) -> Result<(), String>;
}

impl<F> MessageHandler for F
where
    F: FnMut(Value, &mut Replies) -> Result<(), String> + Send,
{
    fn handle(&mut self, payload: Value, replies: &mut Replies) -> Result<(), String> {
        self(payload, replies)
    }
}

/// What `send` did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the link.
    Sent,
    /// Held until both sides finish registration.
    Queued,
}

struct Registration {
    schema: Schema,
    handler: Box<dyn MessageHandler>,
}

/// Protocol endpoint for one side of a peer link.
pub struct PeerProtocol {
    link: PeerLink,
    local: BTreeMap<String, Registration>,
    remote: BTreeMap<String, Value>,
    local_finished: bool,
    remote_finished: bool,
    queue: VecDeque<(String, Value)>,
    closed: bool,
}

impl PeerProtocol {
    /// Wrap an open link.
    pub fn new(link: PeerLink) -> Self {
        Self {
            link,
            local: BTreeMap::new(),
            remote: BTreeMap::new(),
            local_finished: false,
            remote_finished: false,
            queue: VecDeque::new(),
            closed: false,
        }
    }

    /// Register a message name both sides may send.
    pub fn register_two_way<H>(
        &mut self,
        name: &str,
        schema: Schema,
        handler: H,
    ) -> Result<&mut Self, ProtocolError>
    where
        H: MessageHandler + 'static,
    {
        self.ensure_open()?;
        if self.local_finished {
            return Err(self.fail(ProtocolError::RegistrationClosed(name.to_string())));
        }
        validate_name(name)?;
        if self.local.contains_key(name) {
            return Err(ProtocolError::DuplicateName(name.to_string()));
        }

        let sample = serde_json::to_string(&schema.sample())?;
        self.transmit_raw(format!("{} {} {}", PROTOCOL_ADD, name, sample))?;
        self.local.insert(
            name.to_string(),
            Registration {
                schema,
                handler: Box::new(handler),
            },
        );
        debug!("Registered message {}", name);
        Ok(self)
    }

    /// End local registration.
    pub fn finish_local(&mut self) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        if self.local_finished {
            return Err(self.fail(ProtocolError::AlreadyFinished));
        }
        self.local_finished = true;
        self.transmit_raw(PROTOCOL_FINISH.to_string())?;
        if self.remote_finished {
            self.on_ready()?;
        }
        Ok(())
    }

    /// Send a registered message, or queue it until the handshake is done.
    pub fn send(&mut self, name: &str, payload: Value) -> Result<SendOutcome, ProtocolError> {
        self.ensure_open()?;
        let Some(registration) = self.local.get(name) else {
            return Err(self.fail(ProtocolError::UnknownMessage(name.to_string())));
        };
        if !registration.schema.matches(&payload) {
            return Err(self.fail(ProtocolError::ShapeMismatch(name.to_string())));
        }

        if self.is_ready() {
            self.transmit(name, &payload)?;
            Ok(SendOutcome::Sent)
        } else {
            self.queue.push_back((name.to_string(), payload));
            Ok(SendOutcome::Queued)
        }
    }

    /// Process one incoming frame.
    pub fn handle_frame(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        let (name, rest) = match text.split_once(' ') {
            Some((name, rest)) => (name, Some(rest)),
            None => (text, None),
        };

        match name {
            PROTOCOL_ADD => self.on_remote_add(rest.unwrap_or("")),
            PROTOCOL_FINISH => {
                if self.remote_finished {
                    return Err(self.fail(ProtocolError::RemoteAlreadyFinished));
                }
                self.remote_finished = true;
                debug!("Remote finished registration ({} messages)", self.remote.len());
                if self.local_finished {
                    self.on_ready()?;
                }
                Ok(())
            }
            _ => self.on_message(name, rest),
        }
    }

    /// Wait for and process the next frame.
    ///
    /// Returns `Ok(false)` once the link is closed.
    pub async fn pump(&mut self) -> Result<bool, ProtocolError> {
        if self.closed {
            return Ok(false);
        }
        match self.link.recv().await {
            Some(text) => {
                self.handle_frame(&text)?;
                Ok(true)
            }
            None => {
                info!("Peer link {} closed by remote", self.link.session_id());
                self.close();
                Ok(false)
            }
        }
    }

    /// Process every frame already buffered without waiting.
    ///
    /// Returns how many frames were handled.
    pub fn pump_pending(&mut self) -> Result<usize, ProtocolError> {
        let mut handled = 0;
        while !self.closed {
            match self.link.try_recv() {
                Ok(Some(text)) => {
                    self.handle_frame(&text)?;
                    handled += 1;
                }
                Ok(None) => break,
                Err(LinkError::Closed) => {
                    info!("Peer link {} closed by remote", self.link.session_id());
                    self.close();
                }
            }
        }
        Ok(handled)
    }

    /// Both sides finished registration.
    pub fn is_ready(&self) -> bool {
        self.local_finished && self.remote_finished
    }

    /// The link is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Messages waiting for the handshake.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Close the link.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.queue.clear();
            self.link.close();
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        if self.closed {
            Err(ProtocolError::Closed)
        } else {
            Ok(())
        }
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        warn!("Peer protocol violation on {}: {}", self.link.session_id(), err);
        self.close();
        err
    }

    fn on_remote_add(&mut self, body: &str) -> Result<(), ProtocolError> {
        let Some((name, sample)) = body.split_once(' ') else {
            return Err(self.fail(ProtocolError::MalformedFrame(body.to_string())));
        };
        if self.remote_finished {
            return Err(self.fail(ProtocolError::RemoteRegistrationClosed(name.to_string())));
        }
        let sample = match serde_json::from_str::<Value>(sample) {
            Ok(sample) => sample,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.remote.insert(name.to_string(), sample);
        Ok(())
    }

    fn on_message(&mut self, name: &str, body: Option<&str>) -> Result<(), ProtocolError> {
        if !self.is_ready() {
            return Err(self.fail(ProtocolError::NotReady(name.to_string())));
        }
        let Some(body) = body else {
            return Err(self.fail(ProtocolError::MalformedFrame(name.to_string())));
        };
        let payload = match serde_json::from_str::<Value>(body) {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(e.into())),
        };

        let mut replies = Replies::default();
        let verdict = match self.local.get_mut(name) {
            None => Err(ProtocolError::UnknownMessage(name.to_string())),
            Some(reg) if !reg.schema.matches(&payload) => {
                Err(ProtocolError::ShapeMismatch(name.to_string()))
            }
            Some(reg) => reg.handler.handle(payload, &mut replies).map_err(|reason| {
                ProtocolError::Rejected {
                    name: name.to_string(),
                    reason,
                }
            }),
        };
        if let Err(e) = verdict {
            return Err(self.fail(e));
        }

        for (name, payload) in replies.queued {
            self.send(&name, payload)?;
        }
        Ok(())
    }

    fn on_ready(&mut self) -> Result<(), ProtocolError> {
        let mismatch = self
            .remote
            .iter()
            .find(|(name, sample)| {
                self.local
                    .get(*name)
                    .map_or(true, |reg| !reg.schema.matches(sample))
            })
            .map(|(name, _)| name.clone());
        if let Some(name) = mismatch {
            return Err(self.fail(ProtocolError::SchemaMismatch(name)));
        }

        info!(
            "Peer protocol ready on {}, flushing {} queued messages",
            self.link.session_id(),
            self.queue.len()
        );
        while let Some((name, payload)) = self.queue.pop_front() {
            self.transmit(&name, &payload)?;
        }
        Ok(())
    }

    fn transmit(&mut self, name: &str, payload: &Value) -> Result<(), ProtocolError> {
        let body = serde_json::to_string(payload)?;
        self.transmit_raw(format!("{} {}", name, body))
    }

    fn transmit_raw(&mut self, text: String) -> Result<(), ProtocolError> {
        if let Err(e) = self.link.send(text) {
            self.close();
            return Err(e.into());
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ProtocolError::InvalidName(name.to_string()));
    }
    if name == PROTOCOL_ADD || name == PROTOCOL_FINISH {
        return Err(ProtocolError::ReservedName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::SessionId;
    use crate::peer::schema::Kind;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Inbox = Arc<Mutex<Vec<Value>>>;

    fn recorder(inbox: &Inbox) -> impl MessageHandler + 'static {
        let inbox = inbox.clone();
        move |payload: Value, _: &mut Replies| -> Result<(), String> {
            inbox.lock().unwrap().push(payload);
            Ok(())
        }
    }

    fn pair() -> (PeerProtocol, PeerProtocol) {
        let (a, b) = PeerLink::pair(SessionId::from_wire("proto"));
        (PeerProtocol::new(a), PeerProtocol::new(b))
    }

    fn settle(a: &mut PeerProtocol, b: &mut PeerProtocol) {
        loop {
            let handled = a.pump_pending().unwrap() + b.pump_pending().unwrap();
            if handled == 0 {
                break;
            }
        }
    }

    #[test]
    fn test_queued_until_both_finish() {
        let (mut a, mut b) = pair();
        let a_inbox = Inbox::default();
        let b_inbox = Inbox::default();

        a.register_two_way("PushChar", Schema::scalar(Kind::String), recorder(&a_inbox))
            .unwrap();
        a.finish_local().unwrap();
        b.register_two_way("PushChar", Schema::scalar(Kind::String), recorder(&b_inbox))
            .unwrap();

        assert_eq!(a.send("PushChar", json!("q")).unwrap(), SendOutcome::Queued);
        assert_eq!(a.queued(), 1);
        settle(&mut a, &mut b);
        assert!(b_inbox.lock().unwrap().is_empty());

        b.finish_local().unwrap();
        settle(&mut a, &mut b);

        assert!(a.is_ready() && b.is_ready());
        assert_eq!(a.queued(), 0);
        assert_eq!(*b_inbox.lock().unwrap(), vec![json!("q")]);
        assert_eq!(b.send("PushChar", json!("z")).unwrap(), SendOutcome::Sent);
        settle(&mut a, &mut b);
        assert_eq!(*a_inbox.lock().unwrap(), vec![json!("z")]);
    }

    #[test]
    fn test_queue_flushes_in_order() {
        let (mut a, mut b) = pair();
        let inbox = Inbox::default();
        a.register_two_way("N", Schema::scalar(Kind::Number), recorder(&Inbox::default()))
            .unwrap();
        b.register_two_way("N", Schema::scalar(Kind::Number), recorder(&inbox))
            .unwrap();
        for n in 0..5 {
            a.send("N", json!(n)).unwrap();
        }
        a.finish_local().unwrap();
        b.finish_local().unwrap();
        settle(&mut a, &mut b);

        assert_eq!(*inbox.lock().unwrap(), (0..5).map(|n| json!(n)).collect::<Vec<_>>());
    }

    #[test]
    fn test_handler_replies() {
        let (mut a, mut b) = pair();
        let inbox = Inbox::default();
        a.register_two_way("Ping", Schema::scalar(Kind::Null), recorder(&Inbox::default()))
            .unwrap();
        a.register_two_way("Pong", Schema::scalar(Kind::String), recorder(&inbox))
            .unwrap();
        b.register_two_way(
            "Ping",
            Schema::scalar(Kind::Null),
            |_: Value, replies: &mut Replies| -> Result<(), String> {
                replies.send("Pong", json!("hi"));
                Ok(())
            },
        )
        .unwrap();
        b.register_two_way("Pong", Schema::scalar(Kind::String), recorder(&Inbox::default()))
            .unwrap();
        a.finish_local().unwrap();
        b.finish_local().unwrap();
        settle(&mut a, &mut b);

        a.send("Ping", Value::Null).unwrap();
        settle(&mut a, &mut b);
        assert_eq!(*inbox.lock().unwrap(), vec![json!("hi")]);
    }

    #[test]
    fn test_local_misuse() {
        let (mut a, _b) = pair();
        let handler = || recorder(&Inbox::default());

        assert!(matches!(
            a.register_two_way("two words", Schema::scalar(Kind::Null), handler()),
            Err(ProtocolError::InvalidName(_))
        ));
        assert!(matches!(
            a.register_two_way("ProtocolAdd", Schema::scalar(Kind::Null), handler()),
            Err(ProtocolError::ReservedName(_))
        ));
        a.register_two_way("X", Schema::scalar(Kind::Null), handler()).unwrap();
        assert!(matches!(
            a.register_two_way("X", Schema::scalar(Kind::Null), handler()),
            Err(ProtocolError::DuplicateName(_))
        ));
        assert!(!a.is_closed());
    }

    #[test]
    fn test_register_after_finish_is_fatal() {
        let (mut a, _b) = pair();
        a.finish_local().unwrap();
        assert!(matches!(
            a.register_two_way("Late", Schema::scalar(Kind::Null), recorder(&Inbox::default())),
            Err(ProtocolError::RegistrationClosed(_))
        ));
        assert!(a.is_closed());
        assert!(matches!(a.send("Late", Value::Null), Err(ProtocolError::Closed)));
    }

    #[test]
    fn test_finish_twice_is_fatal() {
        let (mut a, _b) = pair();
        a.finish_local().unwrap();
        assert!(matches!(a.finish_local(), Err(ProtocolError::AlreadyFinished)));
        assert!(a.is_closed());
    }

    #[test]
    fn test_send_shape_mismatch_is_fatal() {
        let (mut a, _b) = pair();
        a.register_two_way("S", Schema::scalar(Kind::String), recorder(&Inbox::default()))
            .unwrap();
        assert!(matches!(a.send("S", json!(1)), Err(ProtocolError::ShapeMismatch(_))));
        assert!(a.is_closed());
    }

    #[test]
    fn test_send_unknown_is_fatal() {
        let (mut a, _b) = pair();
        assert!(matches!(a.send("Nope", Value::Null), Err(ProtocolError::UnknownMessage(_))));
        assert!(a.is_closed());
    }

    #[test]
    fn test_incoming_shape_mismatch_closes_both() {
        let (mut a, b) = pair();
        let mut remote = b.link;
        a.register_two_way("S", Schema::scalar(Kind::String), recorder(&Inbox::default()))
            .unwrap();
        a.finish_local().unwrap();
        remote.send("ProtocolAdd S \"\"".to_string()).unwrap();
        remote.send("ProtocolFinish".to_string()).unwrap();
        remote.send("S 5".to_string()).unwrap();

        assert!(matches!(a.pump_pending(), Err(ProtocolError::ShapeMismatch(_))));
        assert!(a.is_closed());
    }

    #[test]
    fn test_message_before_ready_is_fatal() {
        let (mut a, b) = pair();
        let mut remote = b.link;
        a.register_two_way("S", Schema::scalar(Kind::String), recorder(&Inbox::default()))
            .unwrap();
        remote.send("S \"early\"".to_string()).unwrap();

        assert!(matches!(a.pump_pending(), Err(ProtocolError::NotReady(_))));
        assert!(a.is_closed());
    }

    #[test]
    fn test_bad_json_is_fatal() {
        let (mut a, b) = pair();
        let mut remote = b.link;
        remote.send("ProtocolAdd S {not json".to_string()).unwrap();
        assert!(matches!(a.pump_pending(), Err(ProtocolError::Json(_))));
        assert!(a.is_closed());
    }

    #[test]
    fn test_remote_sequencing_violations() {
        let (mut a, b) = pair();
        let mut remote = b.link;
        remote.send("ProtocolFinish".to_string()).unwrap();
        remote.send("ProtocolFinish".to_string()).unwrap();
        assert!(matches!(a.pump_pending(), Err(ProtocolError::RemoteAlreadyFinished)));

        let (mut a, b) = pair();
        let mut remote = b.link;
        remote.send("ProtocolFinish".to_string()).unwrap();
        remote.send("ProtocolAdd S \"\"".to_string()).unwrap();
        assert!(matches!(
            a.pump_pending(),
            Err(ProtocolError::RemoteRegistrationClosed(_))
        ));
    }

    #[test]
    fn test_cross_verification_mismatch() {
        let (mut a, mut b) = pair();
        a.register_two_way("S", Schema::scalar(Kind::String), recorder(&Inbox::default()))
            .unwrap();
        b.register_two_way("S", Schema::scalar(Kind::Number), recorder(&Inbox::default()))
            .unwrap();
        a.finish_local().unwrap();
        b.finish_local().unwrap();

        assert!(matches!(a.pump_pending(), Err(ProtocolError::SchemaMismatch(_))));
        assert!(a.is_closed());
        assert!(matches!(b.pump_pending(), Err(ProtocolError::SchemaMismatch(_))));
        assert!(b.is_closed());
    }

    #[test]
    fn test_remote_name_unknown_locally_fails() {
        let (mut a, b) = pair();
        let mut remote = b.link;
        a.finish_local().unwrap();
        remote.send("ProtocolAdd Extra null".to_string()).unwrap();
        remote.send("ProtocolFinish".to_string()).unwrap();
        assert!(matches!(a.pump_pending(), Err(ProtocolError::SchemaMismatch(_))));
    }

    #[test]
    fn test_handler_rejection_is_fatal() {
        let (mut a, mut b) = pair();
        a.register_two_way("S", Schema::scalar(Kind::String), recorder(&Inbox::default()))
            .unwrap();
        b.register_two_way(
            "S",
            Schema::scalar(Kind::String),
            |_: Value, _: &mut Replies| -> Result<(), String> { Err("no".to_string()) },
        )
        .unwrap();
        a.finish_local().unwrap();
        b.finish_local().unwrap();
        a.pump_pending().unwrap();
        b.pump_pending().unwrap();

        a.send("S", json!("x")).unwrap();
        assert!(matches!(b.pump_pending(), Err(ProtocolError::Rejected { .. })));
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn test_pump_reports_remote_close() {
        let (mut a, b) = pair();
        drop(b);
        assert!(!a.pump().await.unwrap());
        assert!(a.is_closed());
        assert!(matches!(a.finish_local(), Err(ProtocolError::Closed)));
    }
}
