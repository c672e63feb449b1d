//! Broadcast fan-out for Chorus.
//!
//! Fan-out only ever uses non-blocking sends, so it can run while the room
//! is locked. A member that cannot take the message is skipped and counted;
//! it never holds up the rest of the room.

use crate::connection::{ConnectionId, Delivery};
use crate::room::Room;
use chorus_protocol::EncodedMessage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{trace, warn};

/// What to do with a member whose outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlowPeerPolicy {
    /// Drop the message for that member only.
    #[default]
    Drop,
    /// Drop the message and close the member's connection.
    Disconnect,
}

/// Per-recipient tally of one or more broadcasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Messages queued for delivery.
    pub delivered: usize,
    /// Messages dropped because a queue was full.
    pub dropped: usize,
    /// Members whose connection was already gone.
    pub stale: usize,
    /// Members asked to disconnect for falling behind.
    pub evicted: usize,
}

impl BroadcastReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: BroadcastReport) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.stale += other.stale;
        self.evicted += other.evicted;
    }

    /// Total number of recipients attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.stale
    }
}

/// Send `message` to every member of `room` except `excluding`.
pub fn fan_out(
    room: &Room,
    message: &EncodedMessage,
    excluding: Option<&ConnectionId>,
    policy: SlowPeerPolicy,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for (connection_id, member) in room.members() {
        if excluding == Some(connection_id) {
            continue;
        }

        match member.outbox().deliver(Arc::clone(message)) {
            Delivery::Delivered => report.delivered += 1,
            Delivery::Full => {
                report.dropped += 1;
                if policy == SlowPeerPolicy::Disconnect {
                    member.outbox().evict();
                    report.evicted += 1;
                    warn!(room = %room.id(), connection = %connection_id, "Evicting slow member");
                } else {
                    warn!(room = %room.id(), connection = %connection_id, "Outbound queue full, dropping message");
                }
            }
            Delivery::Closed => {
                report.stale += 1;
                trace!(room = %room.id(), connection = %connection_id, "Skipping closed member");
            }
        }
    }

    trace!(room = %room.id(), delivered = report.delivered, "Fan-out complete");
    report
}
