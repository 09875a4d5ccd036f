//! Room Manager: the room membership state machine.
//!
//! A room exists exactly while it has members; creation is the first
//! join, deletion is the last leave. Absence of state is the closed
//! state. The manager is the sole mutator of both sides of the
//! membership relation (room → members and connection → rooms), and every
//! mutation reports the post-mutation count read under the same entry
//! lock, so a reported count is never a stale snapshot.

use crate::connection::ConnectionId;
use dashmap::DashMap;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// A room identifier: the durable id of the live event it channels.
pub type RoomId = String;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 128;

/// Room errors. Only genuine protocol violations surface here; leaving a
/// room you are not in is a no-op, not an error.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Room name failed validation.
    #[error("Invalid room name: {0}")]
    InvalidName(&'static str),

    /// The connection reached its joined-room limit.
    #[error("Joined-room limit reached")]
    LimitReached,
}

/// Validate a room name.
///
/// # Errors
///
/// Returns a description of the violation.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.starts_with('$') {
        return Err("Room names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// Post-mutation view of a room, taken under the room's entry lock.
#[derive(Debug, Clone, Default)]
pub struct RoomUpdate {
    /// Member count after the mutation.
    pub count: usize,
    /// Members after the mutation (recipients of the count report).
    pub members: Vec<ConnectionId>,
}

/// Room membership state: roomID → member set, plus the reverse index
/// connection → joined rooms that backs the disconnect cascade.
pub struct RoomManager {
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
    joined: DashMap<ConnectionId, HashSet<RoomId>>,
    max_rooms_per_connection: usize,
}

impl RoomManager {
    /// Create a room manager allowing each connection to join at most
    /// `max_rooms_per_connection` rooms.
    #[must_use]
    pub fn new(max_rooms_per_connection: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            joined: DashMap::new(),
            max_rooms_per_connection,
        }
    }

    /// Number of active (non-empty) rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Add a connection to a room, creating the room on first join.
    ///
    /// Idempotent: joining a room twice returns the same post-mutation
    /// view as the first join.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid room name or when the connection
    /// is at its joined-room limit.
    pub fn join(&self, room: &str, conn: &ConnectionId) -> Result<RoomUpdate, RoomError> {
        validate_room_name(room).map_err(RoomError::InvalidName)?;

        // Lock order is always joined → rooms.
        let mut joined = self.joined.entry(conn.clone()).or_default();
        if !joined.contains(room) && joined.len() >= self.max_rooms_per_connection {
            return Err(RoomError::LimitReached);
        }
        joined.insert(room.to_string());

        let mut members = self.rooms.entry(room.to_string()).or_default();
        if members.insert(conn.clone()) {
            debug!(room = %room, connection = %conn, count = members.len(), "Joined room");
        }

        Ok(RoomUpdate {
            count: members.len(),
            members: members.iter().cloned().collect(),
        })
    }

    /// Remove a connection from a room, reclaiming the room when it
    /// empties.
    ///
    /// Leaving a room you are not in, or a room that does not exist, is a
    /// no-op reporting count 0; disconnects race with explicit leaves.
    pub fn leave(&self, room: &str, conn: &ConnectionId) -> RoomUpdate {
        if let Some(mut joined) = self.joined.get_mut(conn) {
            joined.remove(room);
        }
        self.remove_member(room, conn)
    }

    /// Remove a connection from every room it joined, as one step of the
    /// disconnect cascade.
    ///
    /// Returns the post-mutation view of each room left, for count
    /// fan-out to the remaining members.
    pub fn leave_all(&self, conn: &ConnectionId) -> Vec<(RoomId, RoomUpdate)> {
        let Some((_, rooms)) = self.joined.remove(conn) else {
            return Vec::new();
        };

        rooms
            .into_iter()
            .map(|room| {
                let update = self.remove_member(&room, conn);
                (room, update)
            })
            .collect()
    }

    fn remove_member(&self, room: &str, conn: &ConnectionId) -> RoomUpdate {
        let Some(mut members) = self.rooms.get_mut(room) else {
            return RoomUpdate::default();
        };

        if members.remove(conn) {
            debug!(room = %room, connection = %conn, count = members.len(), "Left room");
        }

        let update = RoomUpdate {
            count: members.len(),
            members: members.iter().cloned().collect(),
        };

        if members.is_empty() {
            drop(members);
            self.rooms.remove_if(room, |_, set| set.is_empty());
            debug!(room = %room, "Reclaimed empty room");
        }

        update
    }

    /// Current members of a room. Empty for unknown rooms.
    #[must_use]
    pub fn members_of(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Current member count of a room. Zero for unknown rooms.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    /// Rooms a connection has joined.
    #[must_use]
    pub fn rooms_of(&self, conn: &ConnectionId) -> Vec<RoomId> {
        self.joined
            .get(conn)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    #[test]
    fn test_join_is_idempotent() {
        let rooms = RoomManager::new(16);
        let a = conn("a");

        let first = rooms.join("evt-42", &a).unwrap();
        let second = rooms.join("evt-42", &a).unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 1);
        assert_eq!(rooms.member_count("evt-42"), 1);
    }

    #[test]
    fn test_count_tracks_cardinality() {
        let rooms = RoomManager::new(16);
        let (a, b, c) = (conn("a"), conn("b"), conn("c"));

        assert_eq!(rooms.join("evt-1", &a).unwrap().count, 1);
        assert_eq!(rooms.join("evt-1", &b).unwrap().count, 2);
        assert_eq!(rooms.join("evt-1", &c).unwrap().count, 3);

        assert_eq!(rooms.leave("evt-1", &b).count, 2);
        assert_eq!(rooms.member_count("evt-1"), 2);
    }

    #[test]
    fn test_last_leave_reclaims_room() {
        let rooms = RoomManager::new(16);
        let a = conn("a");

        rooms.join("evt-9", &a).unwrap();
        assert_eq!(rooms.room_count(), 1);

        let update = rooms.leave("evt-9", &a);
        assert_eq!(update.count, 0);
        assert!(update.members.is_empty());
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn test_leave_nonmember_is_noop() {
        let rooms = RoomManager::new(16);
        let (a, b) = (conn("a"), conn("b"));

        // Unknown room.
        assert_eq!(rooms.leave("nope", &a).count, 0);

        rooms.join("evt-1", &a).unwrap();
        // Not a member.
        assert_eq!(rooms.leave("evt-1", &b).count, 1);
        assert_eq!(rooms.member_count("evt-1"), 1);
    }

    #[test]
    fn test_leave_all_reports_each_room() {
        let rooms = RoomManager::new(16);
        let (a, b) = (conn("a"), conn("b"));

        rooms.join("evt-1", &a).unwrap();
        rooms.join("evt-1", &b).unwrap();
        rooms.join("evt-2", &a).unwrap();

        let mut left = rooms.leave_all(&a);
        left.sort_by(|(x, _), (y, _)| x.cmp(y));

        assert_eq!(left.len(), 2);
        assert_eq!(left[0].0, "evt-1");
        assert_eq!(left[0].1.count, 1);
        assert_eq!(left[1].0, "evt-2");
        assert_eq!(left[1].1.count, 0);

        assert!(rooms.rooms_of(&a).is_empty());
        assert_eq!(rooms.room_count(), 1);
    }

    #[test]
    fn test_room_limit() {
        let rooms = RoomManager::new(2);
        let a = conn("a");

        rooms.join("evt-1", &a).unwrap();
        rooms.join("evt-2", &a).unwrap();
        assert!(matches!(
            rooms.join("evt-3", &a),
            Err(RoomError::LimitReached)
        ));
        // Re-joining an already-joined room is not limited.
        assert!(rooms.join("evt-2", &a).is_ok());
    }

    #[test]
    fn test_room_name_validation() {
        assert!(validate_room_name("evt-42").is_ok());
        assert!(validate_room_name("").is_err());
        assert!(validate_room_name("$internal").is_err());
        assert!(validate_room_name(&"x".repeat(MAX_ROOM_NAME_LENGTH + 1)).is_err());

        let rooms = RoomManager::new(16);
        assert!(matches!(
            rooms.join("", &conn("a")),
            Err(RoomError::InvalidName(_))
        ));
    }
}
