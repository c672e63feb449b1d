//! Connection handles for Chorus.
//!
//! A connection is owned by the transport task that accepted it. Everything
//! else (rooms, broadcasters) reaches it through a [`ConnectionHandle`], whose
//! outbox never blocks the caller.

use chorus_protocol::EncodedMessage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Notify};

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// Counter so IDs stay unique within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Result of handing a message to a connection's outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the transport task.
    Delivered,
    /// The queue is full; the peer is not keeping up.
    Full,
    /// The transport task is gone.
    Closed,
}

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<EncodedMessage>,
    evict: Arc<Notify>,
}

impl Outbox {
    /// Queue a message without waiting.
    pub fn deliver(&self, message: EncodedMessage) -> Delivery {
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Ask the owning transport task to close the connection.
    pub fn evict(&self) {
        self.evict.notify_one();
    }

    /// Check if the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half of a connection's outbound queue, owned by the transport task.
#[derive(Debug)]
pub struct Mailbox {
    receiver: mpsc::Receiver<EncodedMessage>,
    evict: Arc<Notify>,
}

impl Mailbox {
    /// Wait for the next queued message or an eviction request.
    ///
    /// Eviction wins over queued messages. Cancel safe.
    pub async fn next(&mut self) -> Option<Outgoing> {
        tokio::select! {
            biased;
            () = self.evict.notified() => Some(Outgoing::Evicted),
            message = self.receiver.recv() => message.map(Outgoing::Message),
        }
    }

    /// Take a queued message if one is ready.
    pub fn try_recv(&mut self) -> Option<EncodedMessage> {
        self.receiver.try_recv().ok()
    }
}

/// What the transport task should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Write this message to the peer.
    Message(EncodedMessage),
    /// Close the connection.
    Evicted,
}

/// A connection's identity plus its outbox.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: Outbox,
}

impl ConnectionHandle {
    /// Open a new connection with a generated ID.
    #[must_use]
    pub fn open(capacity: usize) -> (Self, Mailbox) {
        Self::with_id(ConnectionId::generate(), capacity)
    }

    /// Open a new connection with a specific ID.
    #[must_use]
    pub fn with_id(id: ConnectionId, capacity: usize) -> (Self, Mailbox) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let evict = Arc::new(Notify::new());

        let handle = Self {
            id,
            outbox: Outbox {
                sender,
                evict: Arc::clone(&evict),
            },
        };
        (handle, Mailbox { receiver, evict })
    }

    /// Get the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the connection's outbox.
    #[must_use]
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_outbox_full_and_closed() {
        let (handle, mut mailbox) = ConnectionHandle::with_id("conn-1".into(), 1);

        assert_eq!(handle.outbox().deliver(Arc::from("one")), Delivery::Delivered);
        assert_eq!(handle.outbox().deliver(Arc::from("two")), Delivery::Full);
        assert_eq!(mailbox.try_recv().as_deref(), Some("one"));

        drop(mailbox);
        assert!(handle.outbox().is_closed());
        assert_eq!(handle.outbox().deliver(Arc::from("three")), Delivery::Closed);
    }

    #[tokio::test]
    async fn test_evict_wakes_mailbox() {
        let (handle, mut mailbox) = ConnectionHandle::open(4);

        assert_eq!(handle.outbox().deliver(Arc::from("queued")), Delivery::Delivered);

        // The permit is stored even if nobody is waiting yet.
        handle.outbox().evict();
        assert_eq!(mailbox.next().await, Some(Outgoing::Evicted));
        assert_eq!(
            mailbox.next().await,
            Some(Outgoing::Message(Arc::from("queued")))
        );
    }
}
