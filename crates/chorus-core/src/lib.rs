//! # chorus-core
//!
//! Core types for the Chorus room relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Connection** - Identity and non-blocking outbox of one client link
//! - **Room** - A named group of connections
//! - **RoomDirectory** - Room lifecycle and membership, safe to share across tasks
//! - **Broadcast** - Fan-out that tolerates slow and vanished members
//! - **Liveness** - Idle detection for probing and reaping connections
//! - **Session** - The per-connection protocol state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │  Transport  │────▶│   Session   │────▶│ RoomDirectory │
//! └─────────────┘     └─────────────┘     └───────────────┘
//!        ▲                                        │
//!        │            ┌─────────────┐             │
//!        └────────────│   Outbox    │◀────────────┘
//!                     └─────────────┘    fan-out
//! ```

pub mod broadcast;
pub mod connection;
pub mod directory;
pub mod liveness;
pub mod room;
pub mod session;

pub use broadcast::{BroadcastReport, SlowPeerPolicy};
pub use connection::{ConnectionHandle, ConnectionId, Mailbox, Outgoing, DEFAULT_OUTBOX_CAPACITY};
pub use directory::{
    DirectoryConfig, DirectoryError, JoinOutcome, LeaveOutcome, Presence, RoomDirectory, Silent,
};
pub use liveness::{LivenessConfig, Verdict};
pub use room::{Room, RoomId};
pub use session::{Session, SessionError, SessionState};
