//! Rooms and the room registry
//!
//! A room is one host plus the guests in join order. The registry keeps
//! two mutually consistent maps (room id to room, peer id to membership)
//! behind a single lock, so every cross-map operation is atomic. The lock
//! is never held across an await: callers take snapshots and send on them
//! afterwards.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use tracing::warn;

use super::error::RelayError;
use super::peer::Peer;
use super::protocol::{PeerId, RoomId};

/// One active room: the host and its guests in join order.
///
/// Lookups hand out clones; the members are shared `Arc`s, so a clone is
/// a cheap membership snapshot, not a copy of the peers.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub host: Arc<Peer>,
    /// Guests in the order they joined
    pub guests: Vec<Arc<Peer>>,
}

impl Room {
    fn new(id: RoomId, host: Arc<Peer>) -> Self {
        Self {
            id,
            host,
            guests: Vec::new(),
        }
    }

    /// All members, host first, then guests in join order.
    pub fn members(&self) -> Vec<Arc<Peer>> {
        let mut members = Vec::with_capacity(1 + self.guests.len());
        members.push(Arc::clone(&self.host));
        members.extend(self.guests.iter().cloned());
        members
    }

    /// All members except the given peer, in the usual order.
    pub fn members_except(&self, peer_id: PeerId) -> Vec<Arc<Peer>> {
        self.members()
            .into_iter()
            .filter(|p| p.id != peer_id)
            .collect()
    }

    /// Host plus guest count.
    pub fn member_count(&self) -> usize {
        1 + self.guests.len()
    }
}

/// Membership record for the peer-indexed map.
struct PeerEntry {
    room: RoomId,
    peer: Arc<Peer>,
}

#[derive(Default)]
struct RegistryInner {
    rooms: HashMap<RoomId, Arc<RwLock<Room>>>,
    peers: HashMap<PeerId, PeerEntry>,
}

/// Registry of active rooms and their members.
///
/// `max_guests` bounds the guests per room; the host does not count
/// against it.
pub struct RoomRegistry {
    inner: RwLock<RegistryInner>,
    max_guests: usize,
}

impl RoomRegistry {
    pub fn new(max_guests: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            max_guests,
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("room registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("room registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Activate a room with the given host. Fails if the id is already
    /// active.
    pub fn create_room(&self, room_id: &RoomId, host: Arc<Peer>) -> Result<(), RelayError> {
        let mut inner = self.write();

        if inner.rooms.contains_key(room_id) {
            return Err(RelayError::Protocol(format!(
                "room already active: {room_id}"
            )));
        }

        inner.peers.insert(
            host.id,
            PeerEntry {
                room: room_id.clone(),
                peer: Arc::clone(&host),
            },
        );
        inner.rooms.insert(
            room_id.clone(),
            Arc::new(RwLock::new(Room::new(room_id.clone(), host))),
        );
        Ok(())
    }

    /// Add a guest to an active room.
    ///
    /// Atomic: on success the guest is in both maps and the returned
    /// snapshot holds the membership as it was just before the guest was
    /// added. On any failure neither map changes.
    pub fn attach_guest(&self, room_id: &RoomId, guest: Arc<Peer>) -> Result<Vec<Arc<Peer>>, RelayError> {
        let mut inner = self.write();

        let room = Arc::clone(
            inner
                .rooms
                .get(room_id)
                .ok_or_else(|| RelayError::RoomNotFound(room_id.clone()))?,
        );

        let mut room = match room.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if room.guests.len() >= self.max_guests {
            return Err(RelayError::RoomFull(room_id.clone()));
        }

        let existing = room.members();
        room.guests.push(Arc::clone(&guest));
        drop(room);

        // Registry lock is still held: both maps update together
        inner.peers.insert(
            guest.id,
            PeerEntry {
                room: room_id.clone(),
                peer: guest,
            },
        );
        Ok(existing)
    }

    /// Remove a guest from its room and the peer map.
    ///
    /// Returns the departed peer and the remaining membership, or `None`
    /// if the peer is unknown (already removed). Host peers are not
    /// removable this way; tearing down a host means closing the room.
    pub fn remove_guest(&self, peer_id: PeerId) -> Option<(Arc<Peer>, RoomId, Vec<Arc<Peer>>)> {
        let mut inner = self.write();

        let entry = inner.peers.get(&peer_id)?;
        if entry.peer.host {
            return None;
        }
        let room_id = entry.room.clone();

        let entry = inner.peers.remove(&peer_id)?;
        let remaining = match inner.rooms.get(&room_id) {
            Some(room) => {
                let mut room = match room.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                room.guests.retain(|p| p.id != peer_id);
                room.members()
            }
            None => Vec::new(),
        };

        Some((entry.peer, room_id, remaining))
    }

    /// Remove a room and all its members from both maps.
    ///
    /// Returns the full membership, or `None` if the room was not active.
    /// Because every member leaves the peer map here, hooks that re-enter
    /// during teardown find nothing and no-op.
    pub fn close_room(&self, room_id: &RoomId) -> Option<Vec<Arc<Peer>>> {
        let mut inner = self.write();

        let room = inner.rooms.remove(room_id)?;
        let room = match room.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let members = room.members();
        for member in &members {
            inner.peers.remove(&member.id);
        }
        Some(members)
    }

    /// Membership snapshot of a peer's room without the peer itself.
    pub fn members_except(&self, room_id: &RoomId, peer_id: PeerId) -> Option<Vec<Arc<Peer>>> {
        let inner = self.read();
        let room = inner.rooms.get(room_id)?;
        let room = match room.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(room.members_except(peer_id))
    }

    /// Membership snapshot of a room, host first.
    pub fn room_members(&self, room_id: &RoomId) -> Option<Vec<Arc<Peer>>> {
        self.snapshot(room_id).map(|room| room.members())
    }

    /// Snapshot of an active room.
    pub fn snapshot(&self, room_id: &RoomId) -> Option<Room> {
        let inner = self.read();
        let room = inner.rooms.get(room_id)?;
        let room = match room.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(room.clone())
    }

    /// The room a peer belongs to.
    pub fn room_of(&self, peer_id: PeerId) -> Option<RoomId> {
        self.read().peers.get(&peer_id).map(|e| e.room.clone())
    }

    /// Look up a connected peer by id.
    pub fn peer_by_id(&self, peer_id: PeerId) -> Option<Arc<Peer>> {
        self.read().peers.get(&peer_id).map(|e| Arc::clone(&e.peer))
    }

    /// The host of a peer's room.
    pub fn host_of(&self, peer_id: PeerId) -> Option<Arc<Peer>> {
        let inner = self.read();
        let entry = inner.peers.get(&peer_id)?;
        let room = inner.rooms.get(&entry.room)?;
        let room = match room.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(Arc::clone(&room.host))
    }

    /// Whether a room id is currently active.
    pub fn contains_room(&self, room_id: &RoomId) -> bool {
        self.read().rooms.contains_key(room_id)
    }

    /// Number of active rooms.
    pub fn room_count(&self) -> usize {
        self.read().rooms.len()
    }

    /// Number of connected peers across all rooms.
    pub fn peer_count(&self) -> usize {
        self.read().peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::super::channel::channel;
    use super::super::protocol::{MessageEncoding, User};
    use super::*;

    fn make_peer(name: &str, host: bool) -> Arc<Peer> {
        let (ch, _driver) = channel(8);
        Arc::new(Peer::new(
            User::new(name, name),
            host,
            ch,
            MessageEncoding::Json,
        ))
    }

    fn registry_with_room(room_id: &str) -> (RoomRegistry, Arc<Peer>) {
        let registry = RoomRegistry::new(50);
        let host = make_peer("host", true);
        registry
            .create_room(&room_id.to_string(), Arc::clone(&host))
            .unwrap();
        (registry, host)
    }

    #[test]
    fn test_create_room_registers_host() {
        let (registry, host) = registry_with_room("r1");

        assert!(registry.contains_room(&"r1".to_string()));
        assert_eq!(registry.room_of(host.id), Some("r1".to_string()));
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.peer_count(), 1);
    }

    #[test]
    fn test_create_duplicate_room_fails() {
        let (registry, _host) = registry_with_room("r1");
        let other = make_peer("other", true);

        assert!(registry.create_room(&"r1".to_string(), other).is_err());
        assert_eq!(registry.peer_count(), 1);
    }

    #[test]
    fn test_attach_guest_returns_prior_membership() {
        let (registry, host) = registry_with_room("r1");
        let g1 = make_peer("g1", false);
        let g2 = make_peer("g2", false);

        let snapshot = registry
            .attach_guest(&"r1".to_string(), Arc::clone(&g1))
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, host.id);

        let snapshot = registry
            .attach_guest(&"r1".to_string(), Arc::clone(&g2))
            .unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].id, g1.id);

        assert_eq!(registry.peer_count(), 3);
    }

    #[test]
    fn test_attach_guest_unknown_room_changes_nothing() {
        let (registry, _host) = registry_with_room("r1");
        let guest = make_peer("g1", false);

        let err = registry
            .attach_guest(&"missing".to_string(), Arc::clone(&guest))
            .unwrap_err();
        assert!(matches!(err, RelayError::RoomNotFound(id) if id == "missing"));

        assert_eq!(registry.peer_count(), 1);
        assert!(registry.peer_by_id(guest.id).is_none());
    }

    #[test]
    fn test_attach_guest_capacity() {
        let registry = RoomRegistry::new(1);
        let host = make_peer("host", true);
        registry.create_room(&"r1".to_string(), host).unwrap();

        registry
            .attach_guest(&"r1".to_string(), make_peer("g1", false))
            .unwrap();
        let overflow = make_peer("g2", false);
        let err = registry
            .attach_guest(&"r1".to_string(), Arc::clone(&overflow))
            .unwrap_err();

        assert!(matches!(err, RelayError::RoomFull(_)));
        assert!(registry.peer_by_id(overflow.id).is_none());
    }

    #[test]
    fn test_guests_keep_join_order() {
        let (registry, host) = registry_with_room("r1");
        let guests: Vec<_> = (0..5).map(|i| make_peer(&format!("g{i}"), false)).collect();

        for g in &guests {
            registry
                .attach_guest(&"r1".to_string(), Arc::clone(g))
                .unwrap();
        }

        let members = registry.room_members(&"r1".to_string()).unwrap();
        assert_eq!(members[0].id, host.id);
        for (i, g) in guests.iter().enumerate() {
            assert_eq!(members[i + 1].id, g.id);
        }
    }

    #[test]
    fn test_remove_guest() {
        let (registry, _host) = registry_with_room("r1");
        let g1 = make_peer("g1", false);
        let g2 = make_peer("g2", false);
        registry
            .attach_guest(&"r1".to_string(), Arc::clone(&g1))
            .unwrap();
        registry
            .attach_guest(&"r1".to_string(), Arc::clone(&g2))
            .unwrap();

        let (departed, room_id, remaining) = registry.remove_guest(g1.id).unwrap();
        assert_eq!(departed.id, g1.id);
        assert_eq!(room_id, "r1");
        assert_eq!(remaining.len(), 2);

        assert!(registry.peer_by_id(g1.id).is_none());
        assert_eq!(registry.peer_count(), 2);

        // Second removal is a no-op
        assert!(registry.remove_guest(g1.id).is_none());
    }

    #[test]
    fn test_remove_guest_rejects_host() {
        let (registry, host) = registry_with_room("r1");
        assert!(registry.remove_guest(host.id).is_none());
        assert_eq!(registry.peer_count(), 1);
    }

    #[test]
    fn test_close_room_clears_both_maps() {
        let (registry, host) = registry_with_room("r1");
        let guest = make_peer("g1", false);
        registry
            .attach_guest(&"r1".to_string(), Arc::clone(&guest))
            .unwrap();

        let members = registry.close_room(&"r1".to_string()).unwrap();
        assert_eq!(members.len(), 2);

        assert!(!registry.contains_room(&"r1".to_string()));
        assert!(registry.peer_by_id(host.id).is_none());
        assert!(registry.peer_by_id(guest.id).is_none());
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.peer_count(), 0);

        // Idempotent
        assert!(registry.close_room(&"r1".to_string()).is_none());
    }

    #[test]
    fn test_host_of_lookup() {
        let (registry, host) = registry_with_room("r1");
        let guest = make_peer("g1", false);
        registry
            .attach_guest(&"r1".to_string(), Arc::clone(&guest))
            .unwrap();

        assert_eq!(registry.host_of(guest.id).unwrap().id, host.id);
        assert_eq!(registry.host_of(host.id).unwrap().id, host.id);
    }

    #[test]
    fn test_members_except() {
        let (registry, host) = registry_with_room("r1");
        let guest = make_peer("g1", false);
        registry
            .attach_guest(&"r1".to_string(), Arc::clone(&guest))
            .unwrap();

        let members = registry.room_members(&"r1".to_string()).unwrap();
        let others: Vec<_> = members.into_iter().filter(|p| p.id != host.id).collect();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, guest.id);
    }
}
