//! Room lifecycle
//!
//! The manager owns the three lifecycle operations: preparing a room
//! (issuing the host claim without creating anything), redeeming claims
//! into live membership, and tearing rooms down. It also runs the
//! host-gated admission flow for users who hold no claim yet.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::core::credentials::CredentialsManager;

use super::error::RelayError;
use super::messaging::MessageRelay;
use super::peer::Peer;
use super::protocol::{PeerId, RoomClaim, RoomId, User, WireMessage, is_truthy, methods};
use super::room::{Room, RoomRegistry};

/// Result of preparing a room: the id and the host's claim token.
///
/// Nothing is live yet; the room activates when the host connects and
/// redeems the claim.
#[derive(Debug, Clone)]
pub struct PreparedRoom {
    pub room: RoomId,
    pub jwt: String,
}

/// Result of a granted join request: a guest claim token plus whatever
/// value the host answered with (forwarded opaquely to the requester).
#[derive(Debug, Clone)]
pub struct JoinGrant {
    pub jwt: String,
    pub response: Value,
}

/// Owns room lifecycle and admission.
pub struct RoomManager {
    registry: Arc<RoomRegistry>,
    relay: Arc<MessageRelay>,
    credentials: Arc<CredentialsManager>,
}

impl RoomManager {
    pub fn new(
        registry: Arc<RoomRegistry>,
        relay: Arc<MessageRelay>,
        credentials: Arc<CredentialsManager>,
    ) -> Self {
        Self {
            registry,
            relay,
            credentials,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &Arc<MessageRelay> {
        &self.relay
    }

    pub fn credentials(&self) -> &Arc<CredentialsManager> {
        &self.credentials
    }

    /// Reserve a room id and issue the host claim.
    ///
    /// Pure issuance: no room state is created and nothing ever connects
    /// for claims that are never redeemed.
    pub fn prepare_room(&self, user: User) -> Result<PreparedRoom, RelayError> {
        let room = self.credentials.secure_id();
        let claim = RoomClaim {
            room: room.clone(),
            user,
            host: true,
        };
        let jwt = self.credentials.generate_jwt(&claim)?;

        debug!(room = %room, "room prepared");
        Ok(PreparedRoom { room, jwt })
    }

    /// Redeem a verified claim into live membership.
    ///
    /// Host claims activate the room; guest claims join an already active
    /// one. Registers the disconnect hook, announces the new member, and
    /// returns a snapshot of the joined room.
    pub async fn join(self: &Arc<Self>, peer: Arc<Peer>, room_id: &RoomId) -> Result<Room, RelayError> {
        if peer.host {
            self.join_as_host(Arc::clone(&peer), room_id).await?;
        } else {
            self.join_as_guest(Arc::clone(&peer), room_id).await?;
        }
        self.registry
            .snapshot(room_id)
            .ok_or_else(|| RelayError::RoomNotFound(room_id.clone()))
    }

    /// Look up an active room by id.
    pub fn get_room_by_id(&self, room_id: &RoomId) -> Option<Room> {
        self.registry.snapshot(room_id)
    }

    /// Look up the room a connected peer belongs to.
    pub fn get_room_by_peer_id(&self, peer_id: PeerId) -> Option<Room> {
        let room_id = self.registry.room_of(peer_id)?;
        self.registry.snapshot(&room_id)
    }

    async fn join_as_host(self: &Arc<Self>, peer: Arc<Peer>, room_id: &RoomId) -> Result<(), RelayError> {
        self.registry.create_room(room_id, Arc::clone(&peer))?;
        info!(room = %room_id, peer = %peer.id, "room activated");

        // Host disconnect tears the whole room down
        let manager = Arc::downgrade(self);
        let room = room_id.clone();
        peer.channel.on_close(move || {
            if let Some(manager) = manager.upgrade() {
                tokio::spawn(async move {
                    manager.close_room(&room).await;
                });
            }
        });

        peer.send_identity().await
    }

    async fn join_as_guest(self: &Arc<Self>, peer: Arc<Peer>, room_id: &RoomId) -> Result<(), RelayError> {
        let existing = self.registry.attach_guest(room_id, Arc::clone(&peer))?;
        info!(room = %room_id, peer = %peer.id, "guest joined");

        let manager = Arc::downgrade(self);
        let peer_id = peer.id;
        peer.channel.on_close(move || {
            if let Some(manager) = manager.upgrade() {
                tokio::spawn(async move {
                    manager.handle_guest_disconnect(peer_id).await;
                });
            }
        });

        peer.send_identity().await?;

        let descriptor = peer.descriptor_value()?;
        let joined =
            WireMessage::broadcast(peer.id.to_string(), methods::PEER_JOINED, vec![descriptor]);
        self.relay.deliver_to(&existing, &joined).await;
        Ok(())
    }

    /// Tear a room down: drop all membership state, tell the host, close
    /// every member channel. Idempotent.
    pub async fn close_room(self: &Arc<Self>, room_id: &RoomId) {
        let Some(members) = self.registry.close_room(room_id) else {
            return;
        };
        info!(room = %room_id, members = members.len(), "room closed");

        for member in &members {
            if member.host {
                let msg = WireMessage::notification(
                    member.id.to_string(),
                    methods::ROOM_CLOSED,
                    vec![json!(room_id)],
                );
                if let Err(e) = member.send(&msg).await {
                    debug!(peer = %member.id, "room-closed notice undeliverable: {e}");
                }
            }
        }

        // Members already left the registry, so the close hooks firing
        // here find nothing and no-op
        for member in &members {
            member.channel.close();
        }
    }

    /// Handle a guest dropping its connection: remove it and announce the
    /// departure to the remaining members.
    pub async fn handle_guest_disconnect(self: &Arc<Self>, peer_id: PeerId) {
        let Some((departed, room_id, remaining)) = self.registry.remove_guest(peer_id) else {
            return;
        };
        info!(room = %room_id, peer = %peer_id, "guest departed");

        let descriptor = match departed.descriptor_value() {
            Ok(value) => value,
            Err(e) => {
                warn!(peer = %peer_id, "departure descriptor failed: {e}");
                return;
            }
        };
        let left = WireMessage::broadcast(peer_id.to_string(), methods::PEER_LEFT, vec![descriptor]);
        self.relay.deliver_to(&remaining, &left).await;
    }

    /// Ask the room's host to admit a claimless user.
    ///
    /// The host receives a `peer/join` request carrying the user identity.
    /// A truthy answer yields a guest claim plus the host's answer value;
    /// a falsy answer is a rejection; no answer before the deadline is a
    /// timeout. Rejection and timeout are distinct errors.
    pub async fn request_join(&self, room_id: &RoomId, user: User) -> Result<JoinGrant, RelayError> {
        if !self.registry.contains_room(room_id) {
            return Err(RelayError::RoomNotFound(room_id.clone()));
        }
        let host = self
            .registry
            .room_members(room_id)
            .and_then(|members| members.into_iter().find(|p| p.host))
            .ok_or_else(|| RelayError::RoomNotFound(room_id.clone()))?;

        let identity =
            serde_json::to_value(&user).map_err(|e| RelayError::Protocol(e.to_string()))?;
        let answer = match self
            .relay
            .send_request(&host, methods::PEER_JOIN, vec![identity])
            .await
        {
            Ok(answer) => answer,
            // An unreachable host is indistinguishable from a silent one
            Err(_) => return Err(RelayError::JoinTimeout),
        };

        match answer {
            Some(value) if is_truthy(&value) => {
                let claim = RoomClaim {
                    room: room_id.clone(),
                    user,
                    host: false,
                };
                let jwt = self.credentials.generate_jwt(&claim)?;
                Ok(JoinGrant {
                    jwt,
                    response: value,
                })
            }
            Some(_) => Err(RelayError::JoinRejected),
            None => Err(RelayError::JoinTimeout),
        }
    }
}
