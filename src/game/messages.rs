//! Game Messages
//!
//! Names and payload schemas the game registers on the peer protocol.

use crate::peer::schema::{Kind, Schema};

/// A typed character. Payload: the character as a string.
pub const PUSH_CHAR: &str = "PushChar";
/// Backspace. Payload: null.
pub const POP_CHAR: &str = "PopChar";
/// Submit the current guess. Payload: null.
pub const PUSH_WORD: &str = "PushWord";
/// Propose a new target word. Payload: the word.
pub const WORD_ASK: &str = "WordAsk";
/// Answer to `WordAsk`. Payload: "accept" or "reject".
pub const WORD_RESPONSE: &str = "WordResponse";
/// Turn seed. Payload: a 32-bit integer.
pub const DETERMINE_START: &str = "DetermineStart";
/// Propose skipping the current word. Payload: null.
pub const GIVE_UP_ASK: &str = "GiveUpAsk";
/// Answer to `GiveUpAsk`. Payload: "accept" or "reject".
pub const GIVE_UP_RESPONSE: &str = "GiveUpResponse";

/// Every game message with its schema, in registration order.
pub fn catalog() -> [(&'static str, Schema); 8] {
    [
        (PUSH_CHAR, Schema::scalar(Kind::String)),
        (POP_CHAR, Schema::scalar(Kind::Null)),
        (PUSH_WORD, Schema::scalar(Kind::Null)),
        (WORD_ASK, Schema::scalar(Kind::String)),
        (WORD_RESPONSE, Schema::scalar(Kind::String)),
        (DETERMINE_START, Schema::scalar(Kind::Number)),
        (GIVE_UP_ASK, Schema::scalar(Kind::Null)),
        (GIVE_UP_RESPONSE, Schema::scalar(Kind::String)),
    ]
}
