//! Per-connection protocol state machine.
//!
//! A [`Session`] is owned by the task serving one connection. It decodes
//! inbound messages, applies them to the room directory, and fans out the
//! resulting presence and audio messages.
//!
//! ```text
//!            join                     join (other room)
//! Unjoined ────────▶ Joined(room) ◀───────────────────┐
//!     ▲                  │  │                          │
//!     └──── leave/close ─┘  └──────────────────────────┘
//! ```

use crate::broadcast::BroadcastReport;
use crate::connection::{ConnectionHandle, ConnectionId, Delivery};
use crate::directory::{DirectoryError, JoinOutcome, LeaveOutcome, Presence, RoomDirectory};
use crate::liveness::{Liveness, LivenessConfig, Verdict};
use crate::room::RoomId;
use chorus_protocol::{codec, ClientMessage, EncodedMessage, ProtocolError, ServerMessage};
use serde_json::{Number, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Errors from handling a single inbound message.
///
/// None of these close the connection.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The message could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The directory rejected the join.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// The message requires being in a room.
    #[error("Not in a room")]
    NotJoined,
}

impl SessionError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            SessionError::Protocol(e) => e.label(),
            SessionError::Directory(DirectoryError::InvalidRoom(_)) => "invalid_room",
            SessionError::Directory(DirectoryError::RoomLimitReached) => "room_limit",
            SessionError::NotJoined => "not_joined",
        }
    }
}

/// Protocol state of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Not in any room.
    Unjoined,
    /// In exactly one room.
    Joined {
        room_id: RoomId,
        client_id: String,
        display_name: String,
    },
}

/// Protocol handler for one connection.
pub struct Session {
    handle: ConnectionHandle,
    directory: Arc<RoomDirectory>,
    state: SessionState,
    liveness: Liveness,
}

impl Session {
    /// Create a session for a freshly opened connection.
    #[must_use]
    pub fn new(
        directory: Arc<RoomDirectory>,
        handle: ConnectionHandle,
        liveness: LivenessConfig,
    ) -> Self {
        Self {
            handle,
            directory,
            state: SessionState::Unjoined,
            liveness: Liveness::new(liveness, Instant::now()),
        }
    }

    /// Get the connection identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        self.handle.id()
    }

    /// Get the current protocol state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Get the room this session is in, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Joined { room_id, .. } => Some(room_id),
            SessionState::Unjoined => None,
        }
    }

    /// Record activity that did not carry a protocol message.
    pub fn touch(&mut self) {
        self.liveness.touch(Instant::now());
    }

    /// Decide what to do on a liveness tick.
    #[must_use]
    pub fn check_liveness(&self, now: Instant) -> Verdict {
        self.liveness.check(now)
    }

    /// Encoded liveness probe.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn probe(&self) -> Result<EncodedMessage, ProtocolError> {
        codec::encode(&ServerMessage::Ping)
    }

    /// Handle one raw inbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is discarded. The session state is
    /// unchanged in that case.
    pub fn receive(&mut self, data: &[u8]) -> Result<BroadcastReport, SessionError> {
        self.touch();
        let message = codec::decode(data)?;
        self.dispatch(message)
    }

    /// Handle one decoded message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is rejected.
    pub fn dispatch(&mut self, message: ClientMessage) -> Result<BroadcastReport, SessionError> {
        trace!(connection = %self.id(), kind = message.kind(), "Dispatch");

        match message {
            ClientMessage::Join {
                room_id,
                client_id,
                display_name,
            } => self.join(room_id, client_id, display_name),
            ClientMessage::Audio { data, volume } => self.audio(data, volume),
            ClientMessage::Leave => Ok(self.leave()),
            ClientMessage::Ping => {
                self.unicast(&ServerMessage::Pong)?;
                Ok(BroadcastReport::default())
            }
            ClientMessage::Pong => Ok(BroadcastReport::default()),
        }
    }

    /// Leave the current room because the transport is closing.
    ///
    /// Safe to call in any state, any number of times.
    pub fn close(&mut self) -> BroadcastReport {
        self.leave()
    }

    fn join(
        &mut self,
        room_id: String,
        client_id: String,
        display_name: Option<String>,
    ) -> Result<BroadcastReport, SessionError> {
        let display_name = display_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| client_id.clone());

        let outcome = self.directory.join(
            &self.handle,
            &room_id,
            &client_id,
            &display_name,
            &Announcements,
        )?;

        let mut report = outcome.report;
        if let Some(previous) = &outcome.previous {
            report.merge(previous.report);
        }

        debug!(
            connection = %self.id(),
            room = %room_id,
            client = %client_id,
            members = outcome.member_count,
            "Client joined room"
        );

        self.state = SessionState::Joined {
            room_id,
            client_id,
            display_name,
        };

        Ok(report)
    }

    fn audio(&self, data: Value, volume: Option<Number>) -> Result<BroadcastReport, SessionError> {
        let SessionState::Joined {
            room_id,
            client_id,
            display_name,
        } = &self.state
        else {
            return Err(SessionError::NotJoined);
        };

        let relayed = codec::encode(&ServerMessage::Audio {
            client_id: client_id.clone(),
            display_name: display_name.clone(),
            data,
            volume: volume.unwrap_or_else(|| Number::from(0)),
        })?;

        Ok(self
            .directory
            .broadcast(room_id, &relayed, Some(self.handle.id())))
    }

    fn leave(&mut self) -> BroadcastReport {
        self.state = SessionState::Unjoined;

        match self.directory.leave(self.handle.id(), &Announcements) {
            Some(outcome) => {
                debug!(
                    connection = %self.id(),
                    room = %outcome.room_id,
                    remaining = outcome.remaining,
                    "Client left room"
                );
                outcome.report
            }
            None => BroadcastReport::default(),
        }
    }

    fn unicast(&self, message: &ServerMessage) -> Result<(), SessionError> {
        let encoded = codec::encode(message)?;
        match self.handle.outbox().deliver(encoded) {
            Delivery::Delivered => {}
            outcome => {
                debug!(connection = %self.id(), ?outcome, kind = message.kind(), "Unicast not delivered");
            }
        }
        Ok(())
    }
}

/// Presence messages of the wire protocol.
struct Announcements;

impl Announcements {
    fn encode(message: &ServerMessage) -> Option<EncodedMessage> {
        codec::encode(message)
            .map_err(|e| warn!(kind = message.kind(), error = %e, "Failed to encode presence"))
            .ok()
    }
}

impl Presence for Announcements {
    fn joined(&self, outcome: &JoinOutcome) -> Option<EncodedMessage> {
        Self::encode(&ServerMessage::UserJoined {
            client_id: outcome.client_id.clone(),
            display_name: outcome.display_name.clone(),
            member_count: outcome.member_count,
            members: outcome.members.clone(),
        })
    }

    fn room_info(&self, outcome: &JoinOutcome) -> Option<EncodedMessage> {
        Self::encode(&ServerMessage::RoomInfo {
            member_count: outcome.member_count,
            members: outcome.members.clone(),
        })
    }

    fn left(&self, outcome: &LeaveOutcome) -> Option<EncodedMessage> {
        Self::encode(&ServerMessage::UserLeft {
            client_id: outcome.client_id.clone(),
            display_name: outcome.display_name.clone(),
            member_count: outcome.remaining,
            members: outcome.members.clone(),
        })
    }
}
