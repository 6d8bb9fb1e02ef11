//! Real-time event broker
//!
//! Keeps the live registry of connections per identity and fans domain
//! events out to every connection registered for the recipient. Delivery is
//! best effort: an identity with no connections simply misses the push and
//! catches up through the polling reads. Each connection gets its own FIFO
//! queue, so events to one recipient arrive in publish order.

use crate::core::models::{IdentityClaim, IdentitySummary};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub type ConnectionId = u64;

/// Events pushed to connected clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    FriendRequest {
        request_id: String,
        sender: IdentitySummary,
        created_at: DateTime<Utc>,
    },
    FriendRequestAccepted {
        request_id: String,
        friend: IdentitySummary,
        accepted_at: DateTime<Utc>,
    },
    FriendshipRemoved {
        removed_by: IdentitySummary,
        removed_at: DateTime<Utc>,
    },
    ReceiveMessage {
        message_id: String,
        sender_id: String,
        sender_name: String,
        recipient_id: String,
        content: String,
        created_at: DateTime<Utc>,
    },
    NewUnreadMessage {
        message_id: String,
        sender_id: String,
        sender_name: String,
        unread_count: i64,
    },
    MessageDeleted {
        message_id: String,
        sender_id: String,
    },
    MessagesRead {
        reader_id: String,
        reader_name: String,
        message_ids: Vec<String>,
        read_at: DateTime<Utc>,
    },
    Typing {
        sender_id: String,
        sender_name: String,
        is_typing: bool,
        at: DateTime<Utc>,
    },
    // Connection-scoped frames, never published to a channel
    Authenticated {
        user_id: String,
        display_name: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::FriendRequest { .. } => "friend_request",
            ServerEvent::FriendRequestAccepted { .. } => "friend_request_accepted",
            ServerEvent::FriendshipRemoved { .. } => "friendship_removed",
            ServerEvent::ReceiveMessage { .. } => "receive_message",
            ServerEvent::NewUnreadMessage { .. } => "new_unread_message",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
            ServerEvent::MessagesRead { .. } => "messages_read",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::Authenticated { .. } => "authenticated",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// Outbound side of the broker, as seen by the services that emit events
pub trait EventPublisher: Send + Sync {
    /// Queue `event` on every connection of `recipient_id`. Returns how many
    /// connections accepted it; zero means the recipient must poll.
    fn publish(&self, recipient_id: &str, event: ServerEvent) -> usize;
}

struct Connection {
    id: ConnectionId,
    display_name: String,
    tx: mpsc::Sender<ServerEvent>,
}

/// Live registry of identity channels
pub struct EventBroker {
    channels: RwLock<HashMap<String, Vec<Connection>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl EventBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a new authenticated connection under the claim's channel.
    /// Dropping the returned subscription deregisters it.
    pub fn register(self: &Arc<Self>, claim: &IdentityClaim) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        let total = {
            let mut channels = self.channels.write();
            let connections = channels.entry(claim.id.clone()).or_default();
            connections.push(Connection {
                id,
                display_name: claim.display_name.clone(),
                tx,
            });
            connections.len()
        };

        info!(
            "[Broker] {} ({}) connected as #{} ({} live)",
            claim.display_name, claim.id, id, total
        );

        Subscription {
            broker: Arc::clone(self),
            identity_id: claim.id.clone(),
            connection_id: id,
            rx,
        }
    }

    /// Remove one connection. The channel entry stays, possibly empty.
    pub fn deregister(&self, identity_id: &str, connection_id: ConnectionId) -> bool {
        let mut channels = self.channels.write();
        let Some(connections) = channels.get_mut(identity_id) else {
            return false;
        };
        let before = connections.len();
        connections.retain(|c| c.id != connection_id);
        let removed = connections.len() < before;
        if removed {
            info!(
                "[Broker] {} disconnected #{} ({} live)",
                identity_id,
                connection_id,
                connections.len()
            );
        }
        removed
    }

    pub fn connection_count(&self, identity_id: &str) -> usize {
        self.channels
            .read()
            .get(identity_id)
            .map_or(0, |connections| connections.len())
    }

    pub fn is_connected(&self, identity_id: &str) -> bool {
        self.connection_count(identity_id) > 0
    }

    /// Identities with at least one live connection, sorted
    pub fn connected_identities(&self) -> Vec<IdentitySummary> {
        let channels = self.channels.read();
        let mut online: Vec<IdentitySummary> = channels
            .iter()
            .filter_map(|(id, connections)| {
                connections.first().map(|c| IdentitySummary {
                    id: id.clone(),
                    display_name: c.display_name.clone(),
                })
            })
            .collect();
        online.sort_by(|a, b| a.id.cmp(&b.id));
        online
    }
}

impl EventPublisher for EventBroker {
    fn publish(&self, recipient_id: &str, event: ServerEvent) -> usize {
        let channels = self.channels.read();
        let Some(connections) = channels.get(recipient_id).filter(|c| !c.is_empty()) else {
            debug!(
                "[Broker] {} offline, dropping {}",
                recipient_id,
                event.name()
            );
            return 0;
        };

        let mut delivered = 0;
        for connection in connections {
            match connection.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => warn!(
                    "[Broker] queue full for {} #{}, dropped {}",
                    recipient_id,
                    connection.id,
                    event.name()
                ),
                Err(mpsc::error::TrySendError::Closed(_)) => debug!(
                    "[Broker] {} #{} is closing, skipped {}",
                    recipient_id,
                    connection.id,
                    event.name()
                ),
            }
        }

        debug!(
            "[Broker] {} -> {} ({} connections)",
            event.name(),
            recipient_id,
            delivered
        );
        delivered
    }
}

/// Receiving end of one registered connection
pub struct Subscription {
    broker: Arc<EventBroker>,
    identity_id: String,
    connection_id: ConnectionId,
    rx: mpsc::Receiver<ServerEvent>,
}

impl Subscription {
    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.deregister(&self.identity_id, self.connection_id);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{EventPublisher, ServerEvent};
    use parking_lot::Mutex;

    /// Publisher that records everything, as if every recipient were online
    #[derive(Default)]
    pub struct RecordingPublisher {
        events: Mutex<Vec<(String, ServerEvent)>>,
    }

    impl RecordingPublisher {
        pub fn take(&self) -> Vec<(String, ServerEvent)> {
            std::mem::take(&mut *self.events.lock())
        }

        pub fn names_for(&self, recipient: &str) -> Vec<&'static str> {
            self.events
                .lock()
                .iter()
                .filter(|(to, _)| to == recipient)
                .map(|(_, event)| event.name())
                .collect()
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, recipient_id: &str, event: ServerEvent) -> usize {
            self.events.lock().push((recipient_id.to_string(), event));
            1
        }
    }
}
