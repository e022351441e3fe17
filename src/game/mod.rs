//! Game Coordination
//!
//! Turn and consent coordination between two peers playing the same word
//! puzzle. The puzzle rules live behind the `Game` trait; this module only
//! decides when a move may be applied and keeps both sides on the same word.
//!
//! ## Module Structure
//!
//! - `turn`: Seed reconciliation and move parity
//! - `consent`: Ask/response for mutual state changes
//! - `messages`: Message names and schemas on the peer protocol
//! - `session`: A game wired to a peer link

pub mod consent;
pub mod messages;
pub mod session;
pub mod turn;

pub use consent::{Ask, AskKind, ConsentError, ConsentPolicy, ConsentState, Verdict};
pub use session::{GameError, GameSession, SessionEvent};
pub use turn::{Reconciliation, TurnState};

/// The word puzzle being played.
///
/// Moves arrive either from local input or from the remote peer; both are
/// applied through the same calls so the two boards stay identical.
pub trait Game: Send {
    /// Type one character into the current guess.
    fn apply_character_input(&mut self, c: char);

    /// Submit the current guess. Returns whether it was accepted as a move.
    fn apply_word_submit(&mut self) -> bool;

    /// Delete the last character of the current guess.
    fn apply_backspace(&mut self);

    /// Start over on a new target word.
    fn restart(&mut self, word: &str);

    /// The puzzle was solved.
    fn is_won(&self) -> bool;

    /// The puzzle ran out of guesses.
    fn is_lost(&self) -> bool;

    /// Whether `word` may be used as a target.
    fn is_valid_word(&self, word: &str) -> bool;

    /// Won or lost.
    fn is_finished(&self) -> bool {
        self.is_won() || self.is_lost()
    }
}
