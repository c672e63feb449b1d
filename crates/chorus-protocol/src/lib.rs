//! # chorus-protocol
//!
//! Wire protocol definitions for the Chorus room relay.
//!
//! Clients and the server exchange JSON objects tagged with a `type` field
//! over a single full-duplex connection.
//!
//! ## Message Types
//!
//! - `join` / `leave` - Room membership
//! - `audio` - Opaque payload relayed to the rest of the room
//! - `user-joined` / `user-left` / `room-info` - Presence, server to client
//! - `ping` / `pong` - Keepalive, either direction
//!
//! ## Example
//!
//! ```rust
//! use chorus_protocol::{codec, ClientMessage, ServerMessage};
//!
//! let msg = codec::decode_text(r#"{"type":"join","roomId":"lobby","clientId":"a"}"#).unwrap();
//! assert_eq!(msg, ClientMessage::join("lobby", "a"));
//!
//! let encoded = codec::encode(&ServerMessage::Pong).unwrap();
//! assert_eq!(&*encoded, r#"{"type":"pong"}"#);
//! ```

pub mod codec;
pub mod messages;

pub use codec::{decode, decode_text, encode, EncodedMessage, ProtocolError};
pub use messages::{ClientMessage, ServerMessage};
