//! # Wordlink
//!
//! Two players, one word puzzle, no game server. A small WebSocket relay
//! pairs the players and couriers their connection handshake; after that
//! every move travels over a direct peer channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          WORDLINK                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── rng.rs      - 32-bit xorshift, bit-exact on both peers  │
//! │  └── id.rs       - Session codes (52-letter alphabet)        │
//! │                                                              │
//! │  network/        - Signaling relay (server side)             │
//! │  ├── config.rs   - Relay configuration                       │
//! │  ├── protocol.rs - Relay wire frames                         │
//! │  ├── session.rs  - Session registry, pairing, TTL sweep      │
//! │  └── server.rs   - WebSocket accept loop                     │
//! │                                                              │
//! │  peer/           - Between the two players (client side)     │
//! │  ├── establish.rs- Offer/answer/candidate exchange           │
//! │  ├── link.rs     - Direct ordered text channel               │
//! │  ├── schema.rs   - Payload shape checks                      │
//! │  └── protocol.rs - Typed message protocol                    │
//! │                                                              │
//! │  game/           - Turn and consent coordination             │
//! │  ├── turn.rs     - Seed reconciliation, move parity          │
//! │  ├── consent.rs  - Ask / response                            │
//! │  ├── messages.rs - Game message catalog                      │
//! │  └── session.rs  - Game wired to a peer link                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Trust Model
//!
//! The relay never interprets game data. The peer protocol trusts nothing
//! from the remote side: every payload is shape-checked against the local
//! schema and any violation closes the link.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod peer;

// Re-export commonly used types
pub use core::id::{SessionId, SessionIdError};
pub use core::rng::XorShift32;
pub use game::{Game, GameSession, SessionEvent};
pub use network::{RelayConfig, RelayServer};
pub use peer::{PeerLink, PeerProtocol, Schema};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
