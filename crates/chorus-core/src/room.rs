//! Room abstraction for Chorus.
//!
//! Rooms are named groups of connections that receive each other's
//! broadcasts. A room only exists while it has members.

use crate::connection::{ConnectionHandle, ConnectionId, Outbox};
use std::collections::HashMap;
use tracing::debug;

/// Maximum room name length, in characters.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// A room identifier.
pub type RoomId = String;

/// Validate a room identifier.
///
/// # Errors
///
/// Returns an error message if the room identifier is invalid.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if id.chars().count() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if id.chars().any(char::is_control) {
        return Err("Room id contains control characters");
    }
    Ok(())
}

/// Membership record for one connection.
#[derive(Debug, Clone)]
pub struct Member {
    /// Caller-supplied client identifier. Not deduplicated across connections.
    pub client_id: String,
    /// Human-readable label.
    pub display_name: String,
    outbox: Outbox,
    seq: u64,
}

impl Member {
    /// Get the member's outbox.
    #[must_use]
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

/// A room and its members.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashMap<ConnectionId, Member>,
    next_seq: u64,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            members: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Get the room identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Get a member's record.
    #[must_use]
    pub fn get(&self, connection_id: &ConnectionId) -> Option<&Member> {
        self.members.get(connection_id)
    }

    /// Insert or overwrite a connection's membership.
    ///
    /// Returns `true` if this is a new member. An overwritten member keeps
    /// its place in the member list.
    pub fn insert(
        &mut self,
        handle: &ConnectionHandle,
        client_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> bool {
        let client_id = client_id.into();
        let display_name = display_name.into();

        if let Some(existing) = self.members.get_mut(handle.id()) {
            existing.client_id = client_id;
            existing.display_name = display_name;
            existing.outbox = handle.outbox().clone();
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(room = %self.id, connection = %handle.id(), client = %client_id, "Member added");
        self.members.insert(
            handle.id().clone(),
            Member {
                client_id,
                display_name,
                outbox: handle.outbox().clone(),
                seq,
            },
        );
        true
    }

    /// Remove a connection from the room.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Member> {
        let member = self.members.remove(connection_id);
        if let Some(m) = &member {
            debug!(room = %self.id, connection = %connection_id, client = %m.client_id, "Member removed");
        }
        member
    }

    /// Display names of all members, in join order.
    #[must_use]
    pub fn display_names(&self) -> Vec<String> {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.seq);
        members.into_iter().map(|m| m.display_name.clone()).collect()
    }

    /// Iterate over members.
    pub fn members(&self) -> impl Iterator<Item = (&ConnectionId, &Member)> {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> ConnectionHandle {
        ConnectionHandle::with_id(id.into(), 8).0
    }

    #[test]
    fn test_room_creation() {
        let room = Room::new("lobby");
        assert_eq!(room.id(), "lobby");
        assert_eq!(room.len(), 0);
        assert!(room.is_empty());
    }

    #[test]
    fn test_room_insert_remove() {
        let mut room = Room::new("lobby");
        let a = handle("conn-a");
        let b = handle("conn-b");

        assert!(room.insert(&a, "a", "a"));
        assert!(room.insert(&b, "b", "Bob"));
        assert_eq!(room.len(), 2);
        assert!(room.contains(a.id()));

        let removed = room.remove(a.id()).unwrap();
        assert_eq!(removed.client_id, "a");
        assert_eq!(room.len(), 1);

        // Removing a non-member
        assert!(room.remove(a.id()).is_none());
    }

    #[test]
    fn test_display_names_in_join_order() {
        let mut room = Room::new("lobby");
        for name in ["c", "a", "b"] {
            room.insert(&handle(name), name, name);
        }
        assert_eq!(room.display_names(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut room = Room::new("lobby");
        let a = handle("conn-a");
        room.insert(&a, "a", "a");
        room.insert(&handle("conn-b"), "b", "b");

        assert!(!room.insert(&a, "a", "Alice"));
        assert_eq!(room.len(), 2);
        assert_eq!(room.display_names(), vec!["Alice", "b"]);
    }

    #[test]
    fn test_room_id_validation() {
        assert!(validate_room_id("r1").is_ok());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("bad\nid").is_err());

        let long_id = "a".repeat(MAX_ROOM_ID_LENGTH + 1);
        assert!(validate_room_id(&long_id).is_err());
    }

    #[test]
    fn test_room_id_length_counts_characters() {
        // 256 three-byte characters: 768 bytes but within the limit.
        let wide = "語".repeat(MAX_ROOM_ID_LENGTH);
        assert!(validate_room_id(&wide).is_ok());

        let too_wide = "語".repeat(MAX_ROOM_ID_LENGTH + 1);
        assert!(validate_room_id(&too_wide).is_err());
    }
}
