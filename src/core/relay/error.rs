//! Error taxonomy for the relay core
//!
//! Every failure surfaced by the room manager, the message relay or the
//! connection gateway is one of these variants. Callers are expected to
//! match on the variant rather than on message text: in particular the
//! distinction between `JoinRejected` and `JoinTimeout` is part of the
//! `request_join` contract.

use crate::core::credentials::CredentialsError;

/// Failures surfaced by the relay core.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A guest tried to join a room id that is not active.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// The room reached its configured guest capacity.
    #[error("room is full: {0}")]
    RoomFull(String),

    /// The host explicitly denied a join request.
    #[error("join request rejected by host")]
    JoinRejected,

    /// The host did not answer a join request before the deadline, or the
    /// relay call itself failed.
    #[error("join request timed out")]
    JoinTimeout,

    /// The claim token failed signature, expiry or shape validation.
    #[error("invalid claim: {0}")]
    InvalidClaim(#[from] CredentialsError),

    /// The connection carried no claim token at all.
    #[error("connection carries no claim token")]
    UnauthenticatedConnection,

    /// The connection asked for a message encoding we do not know.
    #[error("unsupported message encoding: {0}")]
    UnsupportedEncoding(String),

    /// The peer's channel is closed; nothing can be delivered on it.
    #[error("channel closed")]
    ChannelClosed,

    /// Wire-level failure: a frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}
