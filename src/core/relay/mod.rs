//! Real-time collaboration relay
//!
//! Rooms with one host and ordered guests, claim-gated admission, and
//! message routing (broadcast, notification, correlated request/response)
//! over transport-agnostic channels. The gateway submodule binds the
//! relay to WebSocket and framed-TCP transports.

mod channel;
mod error;
mod gateway;
mod manager;
mod messaging;
mod peer;
mod protocol;
mod room;

pub use channel::{Channel, ChannelDriver, CloseGuard, channel};
pub use error::RelayError;
pub use gateway::{ConnectionMetadata, GatewayState, router, serve_tcp};
pub use manager::{JoinGrant, PreparedRoom, RoomManager};
pub use messaging::{DEFAULT_REQUEST_TIMEOUT, MessageRelay};
pub use peer::Peer;
pub use protocol::{
    MessageEncoding, MessageKind, PeerDescriptor, PeerId, RoomClaim, RoomId, User, WireMessage,
    is_truthy, methods,
};
pub use room::{Room, RoomRegistry};
