//! Peer Layer
//!
//! Everything between two players once the relay put them in touch:
//! - Connection establishment through the relay
//! - The direct link
//! - The typed message protocol on top of it

pub mod establish;
pub mod link;
pub mod protocol;
pub mod schema;

pub use establish::{
    host, host_on, join, join_on, join_with_len, EstablishError, IceCandidate, PeerConnection,
    PeerEvent, PendingHost, RelayClient, DATA_CHANNEL_LABEL,
};
pub use link::{Channel, LinkError, PeerLink};
pub use protocol::{
    MessageHandler, PeerProtocol, ProtocolError, Replies, SendOutcome, PROTOCOL_ADD,
    PROTOCOL_FINISH,
};
pub use schema::{Kind, Schema};
