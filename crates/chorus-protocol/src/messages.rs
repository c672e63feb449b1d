//! Message types for the Chorus protocol.
//!
//! Every message is a JSON object with a `type` discriminator. Inbound and
//! outbound directions use separate enums so a client can never make the
//! server emit a presence event on its behalf.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Message type names, as they appear in the `type` field.
pub mod kind {
    pub const JOIN: &str = "join";
    pub const AUDIO: &str = "audio";
    pub const LEAVE: &str = "leave";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const USER_JOINED: &str = "user-joined";
    pub const USER_LEFT: &str = "user-left";
    pub const ROOM_INFO: &str = "room-info";

    /// Types a client may send.
    pub const CLIENT: &[&str] = &[JOIN, AUDIO, LEAVE, PING, PONG];

    /// Types only the server emits.
    pub const SERVER_ONLY: &[&str] = &[USER_JOINED, USER_LEFT, ROOM_INFO];
}

/// A message sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join a room, leaving any room currently joined.
    #[serde(rename_all = "camelCase")]
    Join {
        room_id: String,
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    /// Audio payload to relay to the rest of the room.
    Audio {
        /// Opaque payload, relayed verbatim.
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        volume: Option<Number>,
    },

    /// Leave the current room.
    Leave,

    /// Keepalive request; answered with `pong`.
    Ping,

    /// Answer to a server-initiated `ping`.
    Pong,
}

impl ClientMessage {
    /// Get the `type` name of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => kind::JOIN,
            ClientMessage::Audio { .. } => kind::AUDIO,
            ClientMessage::Leave => kind::LEAVE,
            ClientMessage::Ping => kind::PING,
            ClientMessage::Pong => kind::PONG,
        }
    }

    /// Create a new Join message.
    #[must_use]
    pub fn join(room_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        ClientMessage::Join {
            room_id: room_id.into(),
            client_id: client_id.into(),
            display_name: None,
        }
    }

    /// Create a new Join message carrying a display name.
    #[must_use]
    pub fn join_as(
        room_id: impl Into<String>,
        client_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        ClientMessage::Join {
            room_id: room_id.into(),
            client_id: client_id.into(),
            display_name: Some(display_name.into()),
        }
    }

    /// Create a new Audio message.
    #[must_use]
    pub fn audio(data: impl Into<Value>, volume: Option<Number>) -> Self {
        ClientMessage::Audio {
            data: data.into(),
            volume,
        }
    }
}

/// A message sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent to a joiner with the room's state after the join.
    #[serde(rename_all = "camelCase")]
    RoomInfo {
        member_count: usize,
        members: Vec<String>,
    },

    /// Sent to existing members when someone joins.
    #[serde(rename_all = "camelCase")]
    UserJoined {
        client_id: String,
        display_name: String,
        member_count: usize,
        members: Vec<String>,
    },

    /// Sent to remaining members when someone leaves.
    #[serde(rename_all = "camelCase")]
    UserLeft {
        client_id: String,
        display_name: String,
        member_count: usize,
        members: Vec<String>,
    },

    /// Relayed audio, stamped with the sender's identity.
    #[serde(rename_all = "camelCase")]
    Audio {
        client_id: String,
        display_name: String,
        data: Value,
        volume: Number,
    },

    /// Liveness probe.
    Ping,

    /// Answer to a client `ping`.
    Pong,
}

impl ServerMessage {
    /// Get the `type` name of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::RoomInfo { .. } => kind::ROOM_INFO,
            ServerMessage::UserJoined { .. } => kind::USER_JOINED,
            ServerMessage::UserLeft { .. } => kind::USER_LEFT,
            ServerMessage::Audio { .. } => kind::AUDIO,
            ServerMessage::Ping => kind::PING,
            ServerMessage::Pong => kind::PONG,
        }
    }
}
