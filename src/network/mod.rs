//! Network Layer
//!
//! WebSocket signaling relay: pairs two anonymous clients per session and
//! forwards their handshake payloads until a direct channel exists.

pub mod config;
pub mod protocol;
pub mod session;
pub mod server;

pub use config::{IceServer, RelayConfig};
pub use protocol::{ClientFrame, FrameError, ServerFrame, Signal};
pub use session::{ClientId, Outbound, RelayError, RelayOutcome, Session, SessionRegistry, MAX_MEMBERS};
pub use server::{RelayServer, RelayServerError};
