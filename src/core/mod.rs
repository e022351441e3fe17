//! Core primitives.
//!
//! Deterministic randomness shared by both peers, and the session codes the
//! relay hands out.

pub mod id;
pub mod rng;

// Re-export core types
pub use id::{SessionId, SessionIdError, DEFAULT_ID_LENGTH};
pub use rng::{random_seed, XorShift32};
