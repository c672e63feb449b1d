//! Room directory for Chorus.
//!
//! The directory maps room identifiers to rooms and each connection to the
//! single room it is in. Every change to a room's membership, including
//! deleting it once empty, happens while holding that room's map entry, so
//! concurrent joins and leaves on one room are linearized. The presence
//! messages describing a change are delivered under that same entry, so
//! every member observes changes in the order they were applied.

use crate::broadcast::{fan_out, BroadcastReport, SlowPeerPolicy};
use crate::connection::{ConnectionHandle, ConnectionId, Delivery};
use crate::room::{validate_room_id, Room, RoomId};
use chorus_protocol::EncodedMessage;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Directory errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// Invalid room identifier.
    #[error("Invalid room id: {0}")]
    InvalidRoom(&'static str),

    /// Maximum number of rooms reached.
    #[error("Maximum rooms reached")]
    RoomLimitReached,
}

/// Directory configuration.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Maximum number of rooms.
    pub max_rooms: usize,
    /// What to do with members that fall behind during fan-out.
    pub slow_peer: SlowPeerPolicy,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            slow_peer: SlowPeerPolicy::Drop,
        }
    }
}

/// Builds the presence messages for membership changes.
///
/// Called while the affected room is still locked. Implementations must not
/// touch the directory. Returning `None` skips that message.
pub trait Presence {
    /// Announcement to the other members after a join.
    fn joined(&self, outcome: &JoinOutcome) -> Option<EncodedMessage>;

    /// Room snapshot for the joining connection.
    fn room_info(&self, outcome: &JoinOutcome) -> Option<EncodedMessage>;

    /// Announcement to the remaining members after a departure.
    fn left(&self, outcome: &LeaveOutcome) -> Option<EncodedMessage>;
}

/// Presence that announces nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Presence for Silent {
    fn joined(&self, _outcome: &JoinOutcome) -> Option<EncodedMessage> {
        None
    }

    fn room_info(&self, _outcome: &JoinOutcome) -> Option<EncodedMessage> {
        None
    }

    fn left(&self, _outcome: &LeaveOutcome) -> Option<EncodedMessage> {
        None
    }
}

/// Room state right after a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Room that was joined.
    pub room_id: RoomId,
    /// Client identifier of the joiner.
    pub client_id: String,
    /// Display name of the joiner.
    pub display_name: String,
    /// Member count including the joiner.
    pub member_count: usize,
    /// Member display names in join order.
    pub members: Vec<String>,
    /// Whether this join created the room.
    pub created: bool,
    /// Departure from a different room the connection was in.
    pub previous: Option<LeaveOutcome>,
    /// Fan-out of the join announcement.
    pub report: BroadcastReport,
}

/// Room state right after a leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Room that was left.
    pub room_id: RoomId,
    /// Client identifier of the departed member.
    pub client_id: String,
    /// Display name of the departed member.
    pub display_name: String,
    /// Members still in the room.
    pub remaining: usize,
    /// Remaining display names in join order.
    pub members: Vec<String>,
    /// Fan-out of the departure announcement.
    pub report: BroadcastReport,
}

impl LeaveOutcome {
    /// Whether the room was deleted because it became empty.
    #[must_use]
    pub fn room_deleted(&self) -> bool {
        self.remaining == 0
    }
}

/// Directory statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryStats {
    /// Number of active rooms.
    pub room_count: usize,
    /// Number of connections currently in a room.
    pub member_count: usize,
}

/// The process-wide room directory.
pub struct RoomDirectory {
    /// Rooms indexed by identifier.
    rooms: DashMap<RoomId, Room>,
    /// Connection -> the room it is in.
    memberships: DashMap<ConnectionId, RoomId>,
    /// Configuration.
    config: DirectoryConfig,
}

impl RoomDirectory {
    /// Create a new directory with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DirectoryConfig::default())
    }

    /// Create a new directory with custom configuration.
    #[must_use]
    pub fn with_config(config: DirectoryConfig) -> Self {
        info!("Creating room directory with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            config,
        }
    }

    /// Get the directory configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Join a room, creating it if needed.
    ///
    /// A connection already in a different room is removed from it first;
    /// that departure is returned in [`JoinOutcome::previous`]. Joining the
    /// room the connection is already in overwrites its record.
    ///
    /// The `presence` announcement goes to the other members and the room
    /// snapshot to the joiner before the room is released.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid or a new room would exceed
    /// the room limit. The connection's existing membership is untouched.
    pub fn join(
        &self,
        handle: &ConnectionHandle,
        room_id: &str,
        client_id: &str,
        display_name: &str,
        presence: &impl Presence,
    ) -> Result<JoinOutcome, DirectoryError> {
        validate_room_id(room_id).map_err(DirectoryError::InvalidRoom)?;

        let current = self.room_of(handle.id());
        let moving = current.as_deref() != Some(room_id);

        // Approximate: another join may create a room between check and insert.
        if moving && !self.rooms.contains_key(room_id) && self.rooms.len() >= self.config.max_rooms
        {
            return Err(DirectoryError::RoomLimitReached);
        }

        let previous = if moving && current.is_some() {
            self.leave(handle.id(), presence)
        } else {
            None
        };

        let mut created = false;
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            created = true;
            debug!(room = %room_id, "Creating new room");
            Room::new(room_id)
        });

        room.insert(handle, client_id, display_name);
        self.memberships
            .insert(handle.id().clone(), room_id.to_string());

        let mut outcome = JoinOutcome {
            room_id: room_id.to_string(),
            client_id: client_id.to_string(),
            display_name: display_name.to_string(),
            member_count: room.len(),
            members: room.display_names(),
            created,
            previous,
            report: BroadcastReport::default(),
        };

        if let Some(joined) = presence.joined(&outcome) {
            outcome.report = fan_out(&room, &joined, Some(handle.id()), self.config.slow_peer);
        }

        if let Some(info) = presence.room_info(&outcome) {
            match handle.outbox().deliver(info) {
                Delivery::Delivered => {}
                delivery => {
                    debug!(room = %room_id, connection = %handle.id(), ?delivery, "Room info not delivered");
                }
            }
        }

        debug!(
            room = %room_id,
            connection = %handle.id(),
            members = outcome.member_count,
            "Joined"
        );

        Ok(outcome)
    }

    /// Remove a connection from whatever room it is in.
    ///
    /// Deletes the room if it becomes empty, otherwise delivers the
    /// `presence` departure to the remaining members before the room is
    /// released. Returns `None` if the connection was not in a room.
    pub fn leave(
        &self,
        connection_id: &ConnectionId,
        presence: &impl Presence,
    ) -> Option<LeaveOutcome> {
        let (_, room_id) = self.memberships.remove(connection_id)?;

        match self.rooms.entry(room_id) {
            Entry::Occupied(mut entry) => {
                let member = entry.get_mut().remove(connection_id)?;
                let mut outcome = LeaveOutcome {
                    room_id: entry.key().clone(),
                    client_id: member.client_id,
                    display_name: member.display_name,
                    remaining: entry.get().len(),
                    members: entry.get().display_names(),
                    report: BroadcastReport::default(),
                };

                if outcome.room_deleted() {
                    entry.remove();
                    debug!(room = %outcome.room_id, "Deleted empty room");
                } else {
                    if let Some(left) = presence.left(&outcome) {
                        outcome.report = fan_out(entry.get(), &left, None, self.config.slow_peer);
                    }
                    debug!(
                        room = %outcome.room_id,
                        connection = %connection_id,
                        remaining = outcome.remaining,
                        "Left"
                    );
                }

                Some(outcome)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Send a message to every member of a room except `excluding`.
    ///
    /// A missing room is a silent no-op.
    pub fn broadcast(
        &self,
        room_id: &str,
        message: &EncodedMessage,
        excluding: Option<&ConnectionId>,
    ) -> BroadcastReport {
        // Exclusive access keeps concurrent broadcasts to one room in the
        // same order for every member.
        let Some(room) = self.rooms.get_mut(room_id) else {
            trace!(room = %room_id, "Broadcast to missing room");
            return BroadcastReport::default();
        };

        fan_out(&room, message, excluding, self.config.slow_peer)
    }

    /// Number of active rooms. May be slightly stale under concurrent changes.
    #[must_use]
    pub fn snapshot(&self) -> usize {
        self.rooms.len()
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Get the member count of a room.
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|r| r.len()).unwrap_or(0)
    }

    /// Get member display names of a room, in join order.
    #[must_use]
    pub fn members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|r| r.display_names())
            .unwrap_or_default()
    }

    /// Get the room a connection is in.
    #[must_use]
    pub fn room_of(&self, connection_id: &ConnectionId) -> Option<RoomId> {
        self.memberships.get(connection_id).map(|r| r.clone())
    }

    /// Get all room identifiers.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Get directory statistics.
    #[must_use]
    pub fn stats(&self) -> DirectoryStats {
        DirectoryStats {
            room_count: self.rooms.len(),
            member_count: self.memberships.len(),
        }
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}
