//! Message relay
//!
//! Delivery primitives on top of the registry: broadcast to a room,
//! notify one peer, and correlated request/response with a deadline.
//! Delivery is best-effort per recipient; one dead channel never blocks
//! the rest of the room.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::RelayError;
use super::peer::Peer;
use super::protocol::{MessageKind, PeerId, WireMessage};
use super::room::RoomRegistry;

/// Default deadline for host-gated requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Routes messages between peers.
///
/// Holds the pending-request table: one slot per in-flight request,
/// claimed by the first response and dropped on timeout.
pub struct MessageRelay {
    registry: Arc<RoomRegistry>,
    pending: DashMap<String, oneshot::Sender<Value>>,
    request_timeout: Duration,
}

impl MessageRelay {
    pub fn new(registry: Arc<RoomRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            pending: DashMap::new(),
            request_timeout,
        }
    }

    /// Deliver a message to every member of the origin's room except the
    /// origin itself.
    ///
    /// Failed deliveries are logged and skipped; the broadcast succeeds if
    /// the origin is in a room at all.
    pub async fn send_broadcast(&self, origin: PeerId, msg: &WireMessage) -> Result<(), RelayError> {
        let room_id = self
            .registry
            .room_of(origin)
            .ok_or(RelayError::ChannelClosed)?;
        let recipients = self
            .registry
            .members_except(&room_id, origin)
            .unwrap_or_default();

        self.deliver_to(&recipients, msg).await;
        Ok(())
    }

    /// Best-effort delivery to a fixed recipient list.
    pub async fn deliver_to(&self, recipients: &[Arc<Peer>], msg: &WireMessage) {
        for peer in recipients {
            if let Err(e) = peer.send(msg).await {
                warn!(peer = %peer.id, method = %msg.method, "delivery failed: {e}");
            }
        }
    }

    /// Deliver a message to exactly one peer.
    pub async fn send_notification(&self, target: PeerId, msg: &WireMessage) -> Result<(), RelayError> {
        let peer = self
            .registry
            .peer_by_id(target)
            .ok_or(RelayError::ChannelClosed)?;
        peer.send(msg).await
    }

    /// Send a correlated request to a peer and wait for its response.
    ///
    /// Returns `Ok(Some(value))` with the first payload element of the
    /// response, `Ok(None)` if the deadline passes or the responder's slot
    /// is dropped without an answer, and `Err` only if the request could
    /// not be sent at all. Responses arriving after the deadline are
    /// discarded by [`handle_response`](Self::handle_response).
    pub async fn send_request(
        &self,
        target: &Arc<Peer>,
        method: &str,
        payload: Vec<Value>,
    ) -> Result<Option<Value>, RelayError> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let msg = WireMessage::request(request_id.clone(), method, payload);
        if let Err(e) = target.send(&msg).await {
            self.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(value)) => Ok(Some(value)),
            // Sender dropped without answering
            Ok(Err(_)) => {
                self.pending.remove(&request_id);
                Ok(None)
            }
            Err(_) => {
                self.pending.remove(&request_id);
                debug!(request = %request_id, method, "request timed out");
                Ok(None)
            }
        }
    }

    /// Resolve a pending request with an incoming response.
    ///
    /// The first response wins; a late or duplicate response finds no slot
    /// and is discarded. Returns whether a waiter was resolved.
    pub fn handle_response(&self, msg: &WireMessage) -> bool {
        if msg.kind != MessageKind::Response {
            return false;
        }

        let Some((_, tx)) = self.pending.remove(&msg.id) else {
            debug!(request = %msg.id, "discarding late or unmatched response");
            return false;
        };

        let value = msg.payload.first().cloned().unwrap_or(Value::Null);
        // Waiter may have timed out between removal and send
        if tx.send(value).is_err() {
            debug!(request = %msg.id, "response waiter already gone");
            return false;
        }
        true
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
