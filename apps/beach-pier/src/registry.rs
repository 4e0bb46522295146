use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::connection::{CloseReason, Connection};

/// Occupants of a single room, at most one connection per user id.
#[derive(Default)]
pub struct RoomSlots {
    occupants: HashMap<String, Connection>,
}

impl RoomSlots {
    /// Connections in this room other than `excluding`'s slot.
    pub fn others<'a>(&'a self, excluding: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.occupants
            .iter()
            .filter(move |(user_id, _)| user_id.as_str() != excluding)
            .map(|(_, conn)| conn)
    }

    pub fn lookup(&self, user_id: &str) -> Option<&Connection> {
        self.occupants.get(user_id)
    }

    /// Puts `conn` into its user's slot. A previous occupant is closed as
    /// part of the claim and handed back.
    pub fn claim(&mut self, conn: Connection) -> Option<Connection> {
        let evicted = self.occupants.insert(conn.user_id().to_string(), conn);
        if let Some(old) = &evicted {
            old.close(CloseReason::Replaced);
        }
        evicted
    }

    /// Empties the slot only if `conn` still occupies it.
    pub fn release_if_current(&mut self, conn: &Connection) -> bool {
        match self.occupants.get(conn.user_id()) {
            Some(current) if current == conn => {
                self.occupants.remove(conn.user_id());
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.occupants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }
}

/// In-memory presence table: room id -> user id -> connection.
///
/// Every operation on a room runs under that room's shard lock, so
/// register, evict and unregister for a slot never interleave.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    rooms: DashMap<String, RoomSlots>,
    prune_empty_rooms: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub occupants: Vec<OccupantSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OccupantSnapshot {
    pub user_id: String,
    pub connection_id: Uuid,
    pub joined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
}

impl Registry {
    pub fn new(prune_empty_rooms: bool) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: DashMap::new(),
                prune_empty_rooms,
            }),
        }
    }

    /// Runs `f` with exclusive access to `room_id`, creating the room if
    /// needed. `f` must not await or touch the registry again.
    pub fn with_room<R>(&self, room_id: &str, f: impl FnOnce(&mut RoomSlots) -> R) -> R {
        let mut room = self.inner.rooms.entry(room_id.to_string()).or_default();
        f(room.value_mut())
    }

    pub fn register(&self, conn: Connection) -> Option<Connection> {
        let room_id = conn.room_id().to_string();
        self.with_room(&room_id, |slots| slots.claim(conn))
    }

    pub fn list_others(&self, room_id: &str, excluding: &str) -> Vec<Connection> {
        self.inner
            .rooms
            .get(room_id)
            .map(|slots| slots.others(excluding).cloned().collect())
            .unwrap_or_default()
    }

    pub fn lookup(&self, room_id: &str, user_id: &str) -> Option<Connection> {
        self.inner
            .rooms
            .get(room_id)
            .and_then(|slots| slots.lookup(user_id).cloned())
    }

    /// Removes `conn` from its slot if it is still the occupant. A stale
    /// handle (already replaced) leaves the newer occupant untouched.
    pub fn unregister_if_current(&self, conn: &Connection) -> bool {
        let removed = match self.inner.rooms.get_mut(conn.room_id()) {
            Some(mut slots) => slots.release_if_current(conn),
            None => false,
        };

        if removed && self.inner.prune_empty_rooms {
            // Checked under the shard lock, so a concurrent join keeps the room.
            self.inner
                .rooms
                .remove_if(conn.room_id(), |_, slots| slots.is_empty());
        }

        removed
    }

    /// Closes every registered connection; used on shutdown. Slots are
    /// freed by each connection's own lifecycle cleanup.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let mut closed = 0usize;
        for room in self.inner.rooms.iter() {
            for conn in room.value().occupants.values() {
                if conn.close(reason) {
                    closed += 1;
                }
            }
        }
        closed
    }

    pub fn room_count(&self) -> usize {
        self.inner.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.rooms.iter().map(|room| room.value().len()).sum()
    }

    pub fn snapshot(&self) -> Vec<RoomSnapshot> {
        let mut rooms: Vec<RoomSnapshot> = self
            .inner
            .rooms
            .iter()
            .map(|room| {
                let mut occupants: Vec<OccupantSnapshot> = room
                    .value()
                    .occupants
                    .values()
                    .map(|conn| OccupantSnapshot {
                        user_id: conn.user_id().to_string(),
                        connection_id: conn.id(),
                        joined_at: conn.joined_at(),
                        remote_addr: conn.remote_addr().map(|addr| addr.to_string()),
                    })
                    .collect();
                occupants.sort_by(|a, b| a.user_id.cmp(&b.user_id));
                RoomSnapshot {
                    room_id: room.key().clone(),
                    occupants,
                }
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(true)
    }
}
