//! Session Identifiers
//!
//! Short codes that peers read to each other to pair up. Generated from OS
//! entropy and mapped into a 52-letter alphabet.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Symbols a session id is drawn from.
pub const ID_ALPHABET: &[u8; 52] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Default session id length.
///
/// 52^5 is roughly 3.8e8 codes, which keeps collisions negligible for the
/// handful of sessions alive within one TTL window.
pub const DEFAULT_ID_LENGTH: usize = 5;

/// Largest multiple of the alphabet size that fits in a byte.
const REJECTION_BOUND: u8 = (256 / ID_ALPHABET.len() * ID_ALPHABET.len()) as u8;

/// Session id parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionIdError {
    /// Wrong number of symbols.
    #[error("session id must be {expected} letters, got {actual}")]
    BadLength {
        /// Required length.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },
    /// Contains a symbol outside the alphabet.
    #[error("session id contains invalid character {0:?}")]
    BadCharacter(char),
}

/// A relay session identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id of `len` symbols from OS entropy.
    pub fn generate(len: usize) -> Self {
        let mut id = String::with_capacity(len);
        let mut buf = [0u8; 16];
        while id.len() < len {
            OsRng.fill_bytes(&mut buf);
            for &byte in buf.iter() {
                // Reject the tail of the byte range so every symbol is equally likely.
                if byte >= REJECTION_BOUND {
                    continue;
                }
                id.push(ID_ALPHABET[(byte as usize) % ID_ALPHABET.len()] as char);
                if id.len() == len {
                    break;
                }
            }
        }
        Self(id)
    }

    /// Validate a user-supplied id of the default length.
    pub fn parse(s: &str) -> Result<Self, SessionIdError> {
        Self::parse_with_len(s, DEFAULT_ID_LENGTH)
    }

    /// Validate a user-supplied id of a given length.
    pub fn parse_with_len(s: &str, len: usize) -> Result<Self, SessionIdError> {
        if let Some(c) = s.chars().find(|c| !c.is_ascii() || !ID_ALPHABET.contains(&(*c as u8))) {
            return Err(SessionIdError::BadCharacter(c));
        }
        if s.len() != len {
            return Err(SessionIdError::BadLength { expected: len, actual: s.len() });
        }
        Ok(Self(s.to_string()))
    }

    /// Wrap a string without validation.
    ///
    /// The relay uses this for ids arriving on the wire; unknown ids simply
    /// fail to match any session.
    pub fn from_wire(s: &str) -> Self {
        Self(s.to_string())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_length_and_alphabet() {
        for len in [1, 5, 8, 32] {
            let id = SessionId::generate(len);
            assert_eq!(id.as_str().len(), len);
            assert!(id.as_str().bytes().all(|b| ID_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_generated_ids_parse() {
        let id = SessionId::generate(DEFAULT_ID_LENGTH);
        assert_eq!(SessionId::parse(id.as_str()), Ok(id));
    }

    #[test]
    fn test_generate_is_not_constant() {
        let a = SessionId::generate(12);
        let b = SessionId::generate(12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        assert_eq!(
            SessionId::parse("abc"),
            Err(SessionIdError::BadLength { expected: 5, actual: 3 })
        );
        assert!(SessionId::parse("abcdef").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_characters() {
        assert_eq!(SessionId::parse("XYZ12"), Err(SessionIdError::BadCharacter('1')));
        assert_eq!(SessionId::parse("ab cd"), Err(SessionIdError::BadCharacter(' ')));
        assert_eq!(SessionId::parse("abcdé"), Err(SessionIdError::BadCharacter('é')));
    }

    #[test]
    fn test_rejection_bound() {
        assert_eq!(REJECTION_BOUND, 208);
    }
}
