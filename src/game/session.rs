//! Game Session
//!
//! Binds a `Game` to a peer link. Local input is applied and mirrored to the
//! remote only on this side's turn; remote moves are applied as they arrive.
//! When the link closes the session drops to offline mode and the game goes
//! on locally with no turn gating.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::rng::random_seed;
use crate::game::consent::{decide, Ask, AskKind, ConsentError, ConsentPolicy, ConsentState, Verdict};
use crate::game::messages::{
    self, DETERMINE_START, GIVE_UP_ASK, GIVE_UP_RESPONSE, POP_CHAR, PUSH_CHAR, PUSH_WORD,
    WORD_ASK, WORD_RESPONSE,
};
use crate::game::turn::TurnState;
use crate::game::Game;
use crate::peer::link::PeerLink;
use crate::peer::protocol::{MessageHandler, PeerProtocol, ProtocolError, Replies};

/// Game session errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// Peer protocol failure. The link is closed.
    #[error("peer protocol: {0}")]
    Protocol(#[from] ProtocolError),
    /// Ask/response misuse.
    #[error(transparent)]
    Consent(#[from] ConsentError),
    /// A handler panicked while holding the game state.
    #[error("game state lock poisoned")]
    Poisoned,
}

/// Notifications for the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Seeds were reconciled and the first shared word chosen.
    Started {
        /// Seed both sides now share.
        seed: i32,
        /// Whether the local player moves first.
        my_turn: bool,
        /// First target word, if a word list was given.
        word: Option<String>,
    },
    /// The remote player typed, deleted or submitted.
    RemoteMove,
    /// The remote player asked for something and this side answered.
    AskReceived {
        /// What was asked.
        ask: Ask,
        /// What was answered.
        verdict: Verdict,
    },
    /// The remote accepted a local ask. It has been applied.
    AskAccepted(Ask),
    /// The remote rejected a local ask.
    AskRejected(Ask),
    /// The link closed. The game continues locally.
    Offline,
}

// =============================================================================
// SHARED STATE
// =============================================================================

struct Shared<G> {
    game: G,
    turn: TurnState,
    consent: ConsentState,
    policy: Box<dyn ConsentPolicy>,
    words: Vec<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
    offline: bool,
}

type SharedRef<G> = Arc<Mutex<Shared<G>>>;

impl<G: Game> Shared<G> {
    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event dropped, no listener");
        }
    }

    fn next_word(&mut self) -> Option<String> {
        if self.words.is_empty() {
            return None;
        }
        let index = self.turn.next_word_index(self.words.len());
        self.words.get(index).cloned()
    }

    fn advance_word(&mut self) {
        if let Some(word) = self.next_word() {
            self.game.restart(&word);
        }
    }

    fn apply_ask(&mut self, ask: &Ask) {
        match ask {
            Ask::Word(word) => self.game.restart(word),
            Ask::GiveUp => self.advance_word(),
        }
    }

    fn on_remote(&mut self, name: &str, payload: Value, replies: &mut Replies) -> Result<(), String> {
        match name {
            PUSH_CHAR => {
                let text = payload.as_str().unwrap_or_default();
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => self.game.apply_character_input(c),
                    _ => return Err(format!("expected one character, got {:?}", text)),
                }
                self.emit(SessionEvent::RemoteMove);
            }
            POP_CHAR => {
                self.game.apply_backspace();
                self.emit(SessionEvent::RemoteMove);
            }
            PUSH_WORD => {
                if self.game.apply_word_submit() {
                    self.turn.record_submission();
                } else {
                    warn!("Remote word submission was not accepted locally");
                }
                self.emit(SessionEvent::RemoteMove);
            }
            DETERMINE_START => {
                let seed = payload
                    .as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| format!("seed {} is not a 32-bit integer", payload))?;
                if let Some(outcome) = self.turn.reconcile(seed) {
                    let word = self.next_word();
                    if let Some(word) = &word {
                        self.game.restart(word);
                    }
                    info!(
                        "Seeds reconciled ({:?}), shared seed {}, my turn: {}",
                        outcome,
                        self.turn.seed(),
                        self.turn.is_my_turn()
                    );
                    self.emit(SessionEvent::Started {
                        seed: self.turn.seed(),
                        my_turn: self.turn.is_my_turn(),
                        word,
                    });
                }
            }
            WORD_ASK | GIVE_UP_ASK => {
                let (ask, response) = if name == WORD_ASK {
                    (Ask::Word(payload.as_str().unwrap_or_default().to_string()), WORD_RESPONSE)
                } else {
                    (Ask::GiveUp, GIVE_UP_RESPONSE)
                };
                let verdict = decide(&ask, &self.game, self.policy.as_mut());
                if verdict.is_accept() {
                    self.apply_ask(&ask);
                }
                replies.send(response, json!(verdict.as_str()));
                self.emit(SessionEvent::AskReceived { ask, verdict });
            }
            WORD_RESPONSE | GIVE_UP_RESPONSE => {
                let kind = if name == WORD_RESPONSE { AskKind::Word } else { AskKind::GiveUp };
                let verdict = Verdict::from_token(payload.as_str().unwrap_or_default());
                if let Some(ask) = self.consent.resolve(kind) {
                    if verdict.is_accept() {
                        self.apply_ask(&ask);
                        self.emit(SessionEvent::AskAccepted(ask));
                    } else {
                        self.emit(SessionEvent::AskRejected(ask));
                    }
                }
            }
            other => return Err(format!("no game handler for {}", other)),
        }
        Ok(())
    }
}

/// Protocol handler for one game message name.
struct Inbound<G> {
    name: &'static str,
    shared: SharedRef<G>,
}

impl<G: Game + 'static> MessageHandler for Inbound<G> {
    fn handle(&mut self, payload: Value, replies: &mut Replies) -> Result<(), String> {
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| "game state lock poisoned".to_string())?;
        shared.on_remote(self.name, payload, replies)
    }
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// A game played against a remote peer.
pub struct GameSession<G> {
    protocol: PeerProtocol,
    shared: SharedRef<G>,
}

impl<G: Game + 'static> GameSession<G> {
    /// Start a session with a random turn seed.
    ///
    /// `words` is the shared word list; both peers must pass the same one.
    pub fn new<P>(
        link: PeerLink,
        game: G,
        words: Vec<String>,
        policy: P,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), GameError>
    where
        P: ConsentPolicy + 'static,
    {
        Self::with_seed(link, game, words, policy, random_seed())
    }

    /// Start a session with a fixed turn seed.
    pub fn with_seed<P>(
        link: PeerLink,
        game: G,
        words: Vec<String>,
        policy: P,
        seed: i32,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), GameError>
    where
        P: ConsentPolicy + 'static,
    {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared {
            game,
            turn: TurnState::new(seed),
            consent: ConsentState::default(),
            policy: Box::new(policy),
            words,
            events,
            offline: false,
        }));

        let mut protocol = PeerProtocol::new(link);
        for (name, schema) in messages::catalog() {
            let handler = Inbound {
                name,
                shared: shared.clone(),
            };
            protocol.register_two_way(name, schema, handler)?;
        }
        protocol.finish_local()?;
        protocol.send(DETERMINE_START, json!(seed))?;

        Ok((Self { protocol, shared }, events_rx))
    }

    /// Type a character. Returns false if it was not this side's turn.
    pub fn push_char(&mut self, c: char) -> Result<bool, GameError> {
        self.local_move(|game| game.apply_character_input(c), PUSH_CHAR, json!(c.to_string()))
    }

    /// Delete a character. Returns false if it was not this side's turn.
    pub fn backspace(&mut self) -> Result<bool, GameError> {
        self.local_move(|game| game.apply_backspace(), POP_CHAR, Value::Null)
    }

    /// Submit the current guess.
    ///
    /// Returns false if it was not this side's turn or the game refused it.
    pub fn submit_word(&mut self) -> Result<bool, GameError> {
        {
            let mut shared = self.lock()?;
            if shared.offline {
                return Ok(shared.game.apply_word_submit());
            }
            if !shared.turn.is_my_turn() || !shared.game.apply_word_submit() {
                return Ok(false);
            }
            shared.turn.record_submission();
        }
        self.transmit(PUSH_WORD, Value::Null)?;
        Ok(true)
    }

    /// Ask the remote to switch to `word`.
    pub fn propose_word(&mut self, word: &str) -> Result<(), GameError> {
        {
            let mut shared = self.lock()?;
            if shared.offline {
                shared.game.restart(word);
                return Ok(());
            }
            shared.consent.begin(&Ask::Word(word.to_string()))?;
        }
        self.transmit(WORD_ASK, json!(word))
    }

    /// Ask the remote to skip to the next shared word.
    pub fn give_up(&mut self) -> Result<(), GameError> {
        {
            let mut shared = self.lock()?;
            if shared.offline {
                shared.advance_word();
                return Ok(());
            }
            shared.consent.begin(&Ask::GiveUp)?;
        }
        self.transmit(GIVE_UP_ASK, Value::Null)
    }

    /// Wait for and handle the next remote message.
    ///
    /// Returns `Ok(false)` once offline.
    pub async fn pump(&mut self) -> Result<bool, GameError> {
        if self.protocol.is_closed() {
            self.go_offline();
            return Ok(false);
        }
        match self.protocol.pump().await {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.go_offline();
                Ok(false)
            }
            Err(e) => {
                self.go_offline();
                Err(e.into())
            }
        }
    }

    /// Handle every remote message already buffered.
    pub fn pump_pending(&mut self) -> Result<usize, GameError> {
        let result = self.protocol.pump_pending();
        if self.protocol.is_closed() {
            self.go_offline();
        }
        Ok(result?)
    }

    /// Whether the local player may move now.
    pub fn is_my_turn(&self) -> Result<bool, GameError> {
        let shared = self.lock()?;
        Ok(shared.offline || shared.turn.is_my_turn())
    }

    /// Whether the link is gone.
    pub fn is_offline(&self) -> Result<bool, GameError> {
        Ok(self.lock()?.offline)
    }

    /// Read the game.
    pub fn with_game<R>(&self, read: impl FnOnce(&G) -> R) -> Result<R, GameError> {
        Ok(read(&self.lock()?.game))
    }

    /// Close the link and continue offline.
    pub fn disconnect(&mut self) {
        self.go_offline();
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared<G>>, GameError> {
        self.shared.lock().map_err(|_| GameError::Poisoned)
    }

    fn local_move<F>(&mut self, apply: F, name: &str, payload: Value) -> Result<bool, GameError>
    where
        F: FnOnce(&mut G),
    {
        {
            let mut shared = self.lock()?;
            if shared.offline {
                apply(&mut shared.game);
                return Ok(true);
            }
            if !shared.turn.is_my_turn() {
                debug!("Ignoring out-of-turn {}", name);
                return Ok(false);
            }
            apply(&mut shared.game);
        }
        self.transmit(name, payload)?;
        Ok(true)
    }

    fn transmit(&mut self, name: &str, payload: Value) -> Result<(), GameError> {
        match self.protocol.send(name, payload) {
            Ok(_) => Ok(()),
            Err(ProtocolError::Closed) => {
                self.go_offline();
                Ok(())
            }
            Err(e) => {
                self.go_offline();
                Err(e.into())
            }
        }
    }

    fn go_offline(&mut self) {
        self.protocol.close();
        match self.shared.lock() {
            Ok(mut shared) if !shared.offline => {
                shared.offline = true;
                shared.consent.clear();
                info!("Peer link closed, continuing offline");
                shared.emit(SessionEvent::Offline);
            }
            Ok(_) => {}
            Err(_) => warn!("Game state lock poisoned while going offline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::SessionId;
    use crate::game::testing::WordBoard;
    use crate::peer::schema::Schema;

    type Session = GameSession<WordBoard>;
    type Events = mpsc::UnboundedReceiver<SessionEvent>;

    fn words() -> Vec<String> {
        ["crane", "slate", "pious", "gourd", "mirth"]
            .iter()
            .map(|w| w.to_string())
            .collect()
    }

    fn accept_all(_: &Ask) -> bool {
        true
    }

    fn reject_all(_: &Ask) -> bool {
        false
    }

    fn open_pair<P>(remote_policy: P) -> (Session, Events, Session, Events)
    where
        P: ConsentPolicy + 'static,
    {
        let (la, lb) = PeerLink::pair(SessionId::from_wire("games"));
        let (a, a_events) =
            GameSession::with_seed(la, WordBoard::default(), words(), accept_all, 900).unwrap();
        let (b, b_events) =
            GameSession::with_seed(lb, WordBoard::default(), words(), remote_policy, 12).unwrap();
        (a, a_events, b, b_events)
    }

    fn settle(a: &mut Session, b: &mut Session) {
        loop {
            let handled = a.pump_pending().unwrap() + b.pump_pending().unwrap();
            if handled == 0 {
                break;
            }
        }
    }

    fn drain(events: &mut Events) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn target(session: &Session) -> String {
        session.with_game(|g| g.target.clone()).unwrap()
    }

    #[test]
    fn test_start_agrees_on_seed_turn_and_word() {
        let (mut a, mut a_events, mut b, mut b_events) = open_pair(accept_all);
        assert!(!a.is_my_turn().unwrap());
        settle(&mut a, &mut b);

        let a_started = drain(&mut a_events);
        let b_started = drain(&mut b_events);
        let (
            [SessionEvent::Started { seed: sa, my_turn: ta, word: wa }],
            [SessionEvent::Started { seed: sb, my_turn: tb, word: wb }],
        ) = (a_started.as_slice(), b_started.as_slice())
        else {
            panic!("unexpected events {:?} / {:?}", a_started, b_started);
        };

        assert_eq!((*sa, *sb), (900, 900));
        assert!(*ta && !*tb);
        assert_eq!(wa, wb);
        assert!(wa.is_some());
        assert_eq!(target(&a), target(&b));
    }

    #[test]
    fn test_moves_follow_turns() {
        let (mut a, _ae, mut b, mut b_events) = open_pair(accept_all);
        settle(&mut a, &mut b);
        drain(&mut b_events);

        assert!(!b.push_char('x').unwrap());
        for c in "pious".chars() {
            assert!(a.push_char(c).unwrap());
        }
        assert!(a.backspace().unwrap());
        assert!(a.push_char('s').unwrap());
        settle(&mut a, &mut b);
        assert_eq!(b.with_game(|g| g.current.clone()).unwrap(), "pious");
        assert_eq!(drain(&mut b_events).len(), 7);

        assert!(a.submit_word().unwrap());
        settle(&mut a, &mut b);
        assert_eq!(b.with_game(|g| g.guesses.clone()).unwrap(), vec!["pious".to_string()]);

        assert!(!a.push_char('q').unwrap());
        assert!(b.push_char('g').unwrap());
        settle(&mut a, &mut b);
        assert_eq!(a.with_game(|g| g.current.clone()).unwrap(), "g");
    }

    #[test]
    fn test_rejected_submission_keeps_turn() {
        let (mut a, _ae, mut b, _be) = open_pair(accept_all);
        settle(&mut a, &mut b);

        a.push_char('a').unwrap();
        assert!(!a.submit_word().unwrap());
        assert!(a.is_my_turn().unwrap());
    }

    #[test]
    fn test_word_ask_accepted() {
        let (mut a, mut a_events, mut b, mut b_events) = open_pair(accept_all);
        settle(&mut a, &mut b);
        drain(&mut a_events);
        drain(&mut b_events);

        a.propose_word("mirth").unwrap();
        settle(&mut a, &mut b);

        let ask = Ask::Word("mirth".to_string());
        assert_eq!(target(&a), "mirth");
        assert_eq!(target(&b), "mirth");
        assert_eq!(drain(&mut a_events), vec![SessionEvent::AskAccepted(ask.clone())]);
        assert_eq!(
            drain(&mut b_events),
            vec![SessionEvent::AskReceived { ask, verdict: Verdict::Accept }]
        );
    }

    #[test]
    fn test_word_ask_rejected() {
        let (mut a, mut a_events, mut b, _be) = open_pair(reject_all);
        settle(&mut a, &mut b);
        let before = target(&a);
        drain(&mut a_events);

        a.propose_word("mirth").unwrap();
        settle(&mut a, &mut b);

        assert_eq!(target(&a), before);
        assert_eq!(target(&b), before);
        assert_eq!(
            drain(&mut a_events),
            vec![SessionEvent::AskRejected(Ask::Word("mirth".to_string()))]
        );
    }

    #[test]
    fn test_invalid_word_is_auto_rejected() {
        let (mut a, mut a_events, mut b, _be) = open_pair(accept_all);
        settle(&mut a, &mut b);
        drain(&mut a_events);

        a.propose_word("toolong").unwrap();
        settle(&mut a, &mut b);
        assert_eq!(
            drain(&mut a_events),
            vec![SessionEvent::AskRejected(Ask::Word("toolong".to_string()))]
        );
    }

    #[test]
    fn test_one_outstanding_ask_per_kind() {
        let (mut a, _ae, mut b, _be) = open_pair(accept_all);
        settle(&mut a, &mut b);

        a.propose_word("mirth").unwrap();
        assert!(matches!(
            a.propose_word("gourd"),
            Err(GameError::Consent(ConsentError::AlreadyPending(AskKind::Word)))
        ));
        a.give_up().unwrap();
        settle(&mut a, &mut b);
        a.propose_word("gourd").unwrap();
    }

    #[test]
    fn test_give_up_advances_both_to_same_word() {
        let (mut a, mut a_events, mut b, _be) = open_pair(accept_all);
        settle(&mut a, &mut b);
        drain(&mut a_events);

        let mut expected = TurnState::new(900);
        expected.reconcile(12);
        let first = words()[expected.next_word_index(5)].clone();
        let second = words()[expected.next_word_index(5)].clone();
        assert_eq!(target(&a), first);

        b.give_up().unwrap();
        settle(&mut a, &mut b);
        assert_eq!(target(&a), second);
        assert_eq!(target(&b), second);
        assert_eq!(
            drain(&mut a_events),
            vec![SessionEvent::AskReceived { ask: Ask::GiveUp, verdict: Verdict::Accept }]
        );
    }

    #[tokio::test]
    async fn test_remote_close_goes_offline() {
        let (mut a, mut a_events, mut b, _be) = open_pair(accept_all);
        settle(&mut a, &mut b);
        drain(&mut a_events);

        b.disconnect();
        assert!(!a.pump().await.unwrap());
        assert!(a.is_offline().unwrap());
        assert_eq!(drain(&mut a_events), vec![SessionEvent::Offline]);

        assert!(a.push_char('z').unwrap());
        assert!(a.is_my_turn().unwrap());
        a.propose_word("gourd").unwrap();
        assert_eq!(target(&a), "gourd");
        assert!(!a.pump().await.unwrap());
        assert!(drain(&mut a_events).is_empty());
    }

    #[test]
    fn test_malformed_remote_move_closes_link() {
        let (la, lb) = PeerLink::pair(SessionId::from_wire("games"));
        let (mut a, mut a_events) =
            GameSession::with_seed(la, WordBoard::default(), words(), accept_all, 5).unwrap();

        let mut rogue = PeerProtocol::new(lb);
        for (name, schema) in messages::catalog() {
            let ignore = |_: Value, _: &mut Replies| -> Result<(), String> { Ok(()) };
            rogue.register_two_way(name, schema, ignore).unwrap();
        }
        rogue.finish_local().unwrap();
        rogue.pump_pending().unwrap();
        rogue.send(PUSH_CHAR, json!("ab")).unwrap();

        assert!(matches!(a.pump_pending(), Err(GameError::Protocol(ProtocolError::Rejected { .. }))));
        assert!(a.is_offline().unwrap());
        assert_eq!(drain(&mut a_events), vec![SessionEvent::Offline]);
    }

    #[test]
    fn test_catalog_schemas() {
        let catalog = messages::catalog();
        assert_eq!(catalog.len(), 8);
        let seed = catalog.iter().find(|(name, _)| *name == DETERMINE_START).unwrap();
        assert!(seed.1.matches(&json!(-123456)));
        assert_ne!(seed.1, Schema::scalar(crate::peer::schema::Kind::String));
    }
}
