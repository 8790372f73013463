//! Wire protocol for relay traffic
//!
//! This module defines the logical message envelope exchanged between the
//! relay and connected peers, the identity DTOs embedded in claims and
//! membership events, and the pluggable per-connection encoders.
//!
//! The envelope shape is fixed; how it becomes bytes is chosen per
//! connection via the `X-Encoding` selector (JSON by default, a compact
//! bincode frame as the binary alternative).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::RelayError;

// ============================================================================
// Type Aliases
// ============================================================================

/// Unique peer identifier, fresh per connection
pub type PeerId = Uuid;

/// Room identifier: the opaque secure id embedded in the host's claim
pub type RoomId = String;

// ============================================================================
// Reserved Method Names
// ============================================================================

/// Method names the relay uses for its own traffic. Anything else is
/// forwarded opaquely between peers.
pub mod methods {
    /// Direct notification telling a peer its own assigned identity
    pub const PEER_IDENTITY: &str = "peer/identity";
    /// Broadcast announcing a new guest to the rest of the room
    pub const PEER_JOINED: &str = "peer/joined";
    /// Broadcast announcing a guest's departure
    pub const PEER_LEFT: &str = "peer/left";
    /// Host-gated admission request sent to the room host
    pub const PEER_JOIN: &str = "peer/join";
    /// Notification to the host that its room is being torn down
    pub const ROOM_CLOSED: &str = "room/closed";
}

// ============================================================================
// Identity DTOs
// ============================================================================

/// Stable user identity, supplied by the external identity provider.
/// Never mutated by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Signed capability payload: possession (after signature verification)
/// grants the right to occupy the stated role in the stated room.
///
/// This is a value, not a room or peer object; a room may exist only as
/// an unredeemed claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomClaim {
    pub room: RoomId,
    pub user: User,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub host: bool,
}

/// Wire-safe public projection of a peer's identity. Used when announcing
/// membership; never carries the channel or internal-only fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub id: PeerId,
    pub user: User,
    pub host: bool,
}

// ============================================================================
// Message Envelope
// ============================================================================

/// Delivery mode of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Fire-and-forget to every room member except the sender
    Broadcast,
    /// Fire-and-forget to exactly one peer
    Notification,
    /// Correlated request; the responder echoes `id`
    Request,
    /// Reply to a request, matched by `id`
    Response,
    /// Error report, routed like a notification
    Error,
}

/// The logical message envelope.
///
/// `id` carries the sender's peer id for fire-and-forget kinds and the
/// correlation id for request/response pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub kind: MessageKind,
    pub method: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub targets: Option<Vec<String>>,
    #[serde(default)]
    pub payload: Vec<Value>,
}

impl WireMessage {
    /// Create a broadcast from the given sender.
    pub fn broadcast(sender: impl Into<String>, method: impl Into<String>, payload: Vec<Value>) -> Self {
        Self {
            kind: MessageKind::Broadcast,
            method: method.into(),
            id: sender.into(),
            targets: None,
            payload,
        }
    }

    /// Create a point-to-point notification from the given sender.
    pub fn notification(
        sender: impl Into<String>,
        method: impl Into<String>,
        payload: Vec<Value>,
    ) -> Self {
        Self {
            kind: MessageKind::Notification,
            method: method.into(),
            id: sender.into(),
            targets: None,
            payload,
        }
    }

    /// Create a correlated request. The responder must echo `request_id`.
    pub fn request(
        request_id: impl Into<String>,
        method: impl Into<String>,
        payload: Vec<Value>,
    ) -> Self {
        Self {
            kind: MessageKind::Request,
            method: method.into(),
            id: request_id.into(),
            targets: None,
            payload,
        }
    }

    /// Create a response to a previously received request.
    pub fn response(
        request_id: impl Into<String>,
        method: impl Into<String>,
        payload: Vec<Value>,
    ) -> Self {
        Self {
            kind: MessageKind::Response,
            method: method.into(),
            id: request_id.into(),
            targets: None,
            payload,
        }
    }

    /// Set explicit delivery targets.
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = Some(targets);
        self
    }
}

/// JSON truthiness, used to interpret a host's answer to a join request:
/// `null`, `false`, `0` and `""` are falsy, everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// Encodings
// ============================================================================

/// Per-connection wire encoding, chosen once at connection-accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEncoding {
    /// Human-readable JSON (the default)
    Json,
    /// Compact binary frame; the payload value array travels as embedded
    /// JSON bytes because a non-self-describing format cannot carry
    /// free-form values
    Bincode,
}

/// Bincode wire frame. Mirrors `WireMessage` with the payload slot
/// pre-serialized.
#[derive(Serialize, Deserialize)]
struct BinaryFrame {
    kind: MessageKind,
    method: String,
    id: String,
    targets: Option<Vec<String>>,
    payload: Vec<u8>,
}

impl MessageEncoding {
    /// Resolve an encoding selector. `None` means the default.
    pub fn from_selector(selector: Option<&str>) -> Result<Self, RelayError> {
        match selector {
            None | Some("json") => Ok(Self::Json),
            Some("bincode") => Ok(Self::Bincode),
            Some(other) => Err(RelayError::UnsupportedEncoding(other.to_string())),
        }
    }

    /// The selector name for this encoding.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Bincode => "bincode",
        }
    }

    /// Serialize an envelope to wire bytes.
    pub fn encode(&self, msg: &WireMessage) -> Result<Vec<u8>, RelayError> {
        match self {
            Self::Json => serde_json::to_vec(msg).map_err(|e| RelayError::Protocol(e.to_string())),
            Self::Bincode => {
                let payload = serde_json::to_vec(&msg.payload)
                    .map_err(|e| RelayError::Protocol(e.to_string()))?;
                let frame = BinaryFrame {
                    kind: msg.kind,
                    method: msg.method.clone(),
                    id: msg.id.clone(),
                    targets: msg.targets.clone(),
                    payload,
                };
                bincode::serde::encode_to_vec(&frame, bincode::config::standard())
                    .map_err(|e| RelayError::Protocol(e.to_string()))
            }
        }
    }

    /// Deserialize wire bytes into an envelope.
    pub fn decode(&self, bytes: &[u8]) -> Result<WireMessage, RelayError> {
        match self {
            Self::Json => {
                serde_json::from_slice(bytes).map_err(|e| RelayError::Protocol(e.to_string()))
            }
            Self::Bincode => {
                let (frame, _): (BinaryFrame, usize) =
                    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                        .map_err(|e| RelayError::Protocol(e.to_string()))?;
                let payload = serde_json::from_slice(&frame.payload)
                    .map_err(|e| RelayError::Protocol(e.to_string()))?;
                Ok(WireMessage {
                    kind: frame.kind,
                    method: frame.method,
                    id: frame.id,
                    targets: frame.targets,
                    payload,
                })
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
