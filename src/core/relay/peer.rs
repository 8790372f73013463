//! Connected peer
//!
//! A `Peer` binds a verified identity to a live channel for the lifetime of
//! one connection. The id is freshly generated per connection: the same
//! user reconnecting gets a new peer id, and the old one is never reused.

use serde_json::Value;
use uuid::Uuid;

use super::channel::Channel;
use super::error::RelayError;
use super::protocol::{MessageEncoding, PeerDescriptor, PeerId, User, WireMessage, methods};

/// A live participant: verified identity plus the channel to reach it.
#[derive(Debug)]
pub struct Peer {
    /// Fresh per connection, never reused
    pub id: PeerId,
    /// Identity from the verified claim
    pub user: User,
    /// Whether this peer holds the host role in its room
    pub host: bool,
    /// Outbound channel to the peer's connection
    pub channel: Channel,
    /// Wire encoding negotiated at connection-accept time
    pub encoding: MessageEncoding,
    /// Optional public key announced by the client, forwarded opaquely
    pub public_key: Option<String>,
    /// Compression schemes the client supports, empty when unannounced
    pub compression: Vec<String>,
    /// Optional client software identifier, for logs only
    pub client: Option<String>,
}

impl Peer {
    /// Create a peer with a fresh id.
    pub fn new(user: User, host: bool, channel: Channel, encoding: MessageEncoding) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            host,
            channel,
            encoding,
            public_key: None,
            compression: Vec::new(),
            client: None,
        }
    }

    /// Attach optional connection metadata announced by the client.
    pub fn with_metadata(
        mut self,
        public_key: Option<String>,
        compression: Vec<String>,
        client: Option<String>,
    ) -> Self {
        self.public_key = public_key;
        self.compression = compression;
        self.client = client;
        self
    }

    /// Public projection of this peer, safe to put on the wire.
    pub fn to_protocol(&self) -> PeerDescriptor {
        PeerDescriptor {
            id: self.id,
            user: self.user.clone(),
            host: self.host,
        }
    }

    /// Encode a message with this peer's negotiated encoding and queue it.
    pub async fn send(&self, msg: &WireMessage) -> Result<(), RelayError> {
        let bytes = self.encoding.encode(msg)?;
        self.channel.send(bytes).await
    }

    /// Tell the peer its own assigned identity.
    pub async fn send_identity(&self) -> Result<(), RelayError> {
        let descriptor = serde_json::to_value(self.to_protocol())
            .map_err(|e| RelayError::Protocol(e.to_string()))?;
        let msg = WireMessage::notification(
            self.id.to_string(),
            methods::PEER_IDENTITY,
            vec![descriptor],
        );
        self.send(&msg).await
    }

    /// Descriptor as a JSON value, for membership-event payloads.
    pub fn descriptor_value(&self) -> Result<Value, RelayError> {
        serde_json::to_value(self.to_protocol()).map_err(|e| RelayError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::channel::channel;
    use super::super::protocol::MessageKind;
    use super::*;

    fn test_peer(host: bool) -> (Peer, tokio::sync::mpsc::Receiver<Vec<u8>>) {
        let (ch, driver) = channel(8);
        let (outbound, _shutdown, guard) = driver.into_parts();
        // Keep hooks from firing mid-test
        std::mem::forget(guard);

        let peer = Peer::new(User::new("u1", "Ann"), host, ch, MessageEncoding::Json);
        (peer, outbound)
    }

    #[test]
    fn test_fresh_id_per_peer() {
        let (a, _) = test_peer(false);
        let (b, _) = test_peer(false);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_to_protocol_projection() {
        let (peer, _) = test_peer(true);
        let descriptor = peer.to_protocol();

        assert_eq!(descriptor.id, peer.id);
        assert_eq!(descriptor.user, peer.user);
        assert!(descriptor.host);
    }

    #[tokio::test]
    async fn test_send_uses_negotiated_encoding() {
        let (peer, mut outbound) = test_peer(false);
        let msg = WireMessage::notification(peer.id.to_string(), "ping", vec![]);

        peer.send(&msg).await.unwrap();

        let bytes = outbound.recv().await.unwrap();
        let decoded = MessageEncoding::Json.decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn test_send_identity_shape() {
        let (peer, mut outbound) = test_peer(true);
        peer.send_identity().await.unwrap();

        let bytes = outbound.recv().await.unwrap();
        let msg = MessageEncoding::Json.decode(&bytes).unwrap();

        assert_eq!(msg.kind, MessageKind::Notification);
        assert_eq!(msg.method, methods::PEER_IDENTITY);
        assert_eq!(msg.id, peer.id.to_string());
        assert_eq!(msg.payload.len(), 1);
        assert_eq!(msg.payload[0]["id"], peer.id.to_string());
        assert_eq!(msg.payload[0]["host"], true);
    }
}
