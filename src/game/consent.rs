//! Ask / Response
//!
//! Changes neither side may make alone (a new target word, giving up) are
//! proposed with an Ask. The receiver decides, applies the change if it
//! accepts, and answers. The asker applies the change only on "accept".

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::game::Game;

/// Consent errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsentError {
    /// An ask of this kind is still waiting for its response.
    #[error("a {0} ask is already pending")]
    AlreadyPending(AskKind),
}

/// Category of an ask. One may be outstanding per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AskKind {
    /// Change the target word.
    Word,
    /// Abandon the current word.
    GiveUp,
}

impl fmt::Display for AskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AskKind::Word => f.write_str("word"),
            AskKind::GiveUp => f.write_str("give-up"),
        }
    }
}

/// A proposed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ask {
    /// Restart on this word.
    Word(String),
    /// Skip to the next shared word.
    GiveUp,
}

impl Ask {
    /// Category of this ask.
    pub fn kind(&self) -> AskKind {
        match self {
            Ask::Word(_) => AskKind::Word,
            Ask::GiveUp => AskKind::GiveUp,
        }
    }
}

/// Answer to an ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Apply the change.
    Accept,
    /// Leave things as they are.
    Reject,
}

impl Verdict {
    /// Wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accept => "accept",
            Verdict::Reject => "reject",
        }
    }

    /// Read a wire token. Anything but "accept" is a rejection.
    pub fn from_token(token: &str) -> Self {
        match token {
            "accept" => Verdict::Accept,
            "reject" => Verdict::Reject,
            other => {
                warn!("Unknown response token {:?}, treating as reject", other);
                Verdict::Reject
            }
        }
    }

    /// Whether this is `Accept`.
    pub fn is_accept(self) -> bool {
        self == Verdict::Accept
    }
}

/// Human confirmation gate for asks that pass the automatic checks.
pub trait ConsentPolicy: Send {
    /// Return true to accept.
    fn confirm(&mut self, ask: &Ask) -> bool;
}

impl<F> ConsentPolicy for F
where
    F: FnMut(&Ask) -> bool + Send,
{
    fn confirm(&mut self, ask: &Ask) -> bool {
        self(ask)
    }
}

/// Decide on a remote ask.
///
/// Finished games and invalid words are rejected without asking the policy.
pub fn decide(ask: &Ask, game: &dyn Game, policy: &mut dyn ConsentPolicy) -> Verdict {
    if game.is_finished() {
        return Verdict::Reject;
    }
    if let Ask::Word(word) = ask {
        if !game.is_valid_word(word) {
            return Verdict::Reject;
        }
    }
    if policy.confirm(ask) {
        Verdict::Accept
    } else {
        Verdict::Reject
    }
}

/// Outstanding local asks.
#[derive(Debug, Default, Clone)]
pub struct ConsentState {
    word: Option<String>,
    give_up: bool,
}

impl ConsentState {
    /// Record a new local ask.
    pub fn begin(&mut self, ask: &Ask) -> Result<(), ConsentError> {
        if self.is_pending(ask.kind()) {
            return Err(ConsentError::AlreadyPending(ask.kind()));
        }
        match ask {
            Ask::Word(word) => self.word = Some(word.clone()),
            Ask::GiveUp => self.give_up = true,
        }
        Ok(())
    }

    /// Take the outstanding ask matching a response.
    ///
    /// `None` means the response matched nothing and must be ignored.
    pub fn resolve(&mut self, kind: AskKind) -> Option<Ask> {
        let ask = match kind {
            AskKind::Word => self.word.take().map(Ask::Word),
            AskKind::GiveUp => std::mem::take(&mut self.give_up).then_some(Ask::GiveUp),
        };
        if ask.is_none() {
            warn!("Ignoring {} response with no outstanding ask", kind);
        }
        ask
    }

    /// Whether an ask of this kind is outstanding.
    pub fn is_pending(&self, kind: AskKind) -> bool {
        match kind {
            AskKind::Word => self.word.is_some(),
            AskKind::GiveUp => self.give_up,
        }
    }

    /// Drop all outstanding asks.
    pub fn clear(&mut self) {
        self.word = None;
        self.give_up = false;
    }
}
