use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use souk_shared::{ConnectionId, ConversationId, ServerEvent, UserId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::error::ChatError;

/// Where a live connection is in its lifecycle. A closed connection is
/// simply absent from the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Joined {
        conversation_id: ConversationId,
        user_id: UserId,
    },
}

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<ServerEvent>,
    state: SessionState,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Broadcast groups, one per conversation with live subscribers.
    groups: HashMap<ConversationId, HashSet<ConnectionId>>,
}

impl HubInner {
    fn deliver(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        match self.connections.get(connection_id) {
            Some(entry) => {
                if entry.tx.send(event).is_err() {
                    debug!(conn = %connection_id.short(), "Dropping event for closed connection");
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }
}

/// Live connections and the broadcast group each one is subscribed to.
///
/// Outbound queues are unbounded: delivery is best effort and never
/// applies backpressure to the sender.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    inner: Arc<RwLock<HubInner>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. The receiver yields every event addressed
    /// to it until the connection is removed.
    pub async fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = ConnectionId::new();

        let mut inner = self.inner.write().await;
        inner.connections.insert(
            connection_id,
            ConnectionEntry {
                tx,
                state: SessionState::Connected,
            },
        );

        debug!(
            conn = %connection_id.short(),
            connections = inner.connections.len(),
            "Connection registered"
        );
        (connection_id, rx)
    }

    #[cfg(test)]
    pub async fn state(&self, connection_id: ConnectionId) -> Option<SessionState> {
        self.inner
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|e| e.state)
    }

    /// Move a connection from `Connected` to `Joined` and subscribe it to the
    /// conversation's group.
    pub async fn join_group(
        &self,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;

        let entry = inner
            .connections
            .get_mut(&connection_id)
            .ok_or(ChatError::UnknownConnection(connection_id))?;

        if let SessionState::Joined {
            conversation_id: current,
            ..
        } = entry.state
        {
            return Err(ChatError::AlreadyJoined { current });
        }

        entry.state = SessionState::Joined {
            conversation_id,
            user_id,
        };
        let group = inner.groups.entry(conversation_id).or_default();
        group.insert(connection_id);

        info!(
            conversation = %conversation_id,
            conn = %connection_id.short(),
            members = group.len(),
            "Connection joined conversation"
        );
        Ok(())
    }

    /// Queue an event for a single connection.
    pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        self.inner.read().await.deliver(&connection_id, event)
    }

    /// Send to every subscriber of a conversation, optionally skipping one
    /// connection. Returns how many connections the event was queued for.
    pub async fn broadcast_group(
        &self,
        conversation_id: ConversationId,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let inner = self.inner.read().await;
        let Some(group) = inner.groups.get(&conversation_id) else {
            return 0;
        };

        group
            .iter()
            .filter(|conn| Some(**conn) != except)
            .filter(|conn| inner.deliver(conn, event.clone()))
            .count()
    }

    /// Send to every live connection, optionally skipping one.
    pub async fn broadcast_all(&self, event: ServerEvent, except: Option<ConnectionId>) -> usize {
        let inner = self.inner.read().await;
        inner
            .connections
            .keys()
            .filter(|conn| Some(**conn) != except)
            .filter(|conn| inner.deliver(conn, event.clone()))
            .count()
    }

    /// Drop a connection and its group membership. Dropping the sender ends
    /// the connection's event stream once queued events are drained.
    pub async fn remove(&self, connection_id: ConnectionId) -> Option<SessionState> {
        let mut inner = self.inner.write().await;
        let entry = inner.connections.remove(&connection_id)?;

        if let SessionState::Joined {
            conversation_id,
            user_id,
        } = entry.state
        {
            debug!(
                conversation = %conversation_id,
                user = %user_id,
                "Leaving broadcast group"
            );
            let now_empty = match inner.groups.get_mut(&conversation_id) {
                Some(group) => {
                    group.remove(&connection_id);
                    group.is_empty()
                }
                None => false,
            };
            if now_empty {
                inner.groups.remove(&conversation_id);
                debug!(conversation = %conversation_id, "Removed empty broadcast group");
            }
        }

        debug!(
            conn = %connection_id.short(),
            connections = inner.connections.len(),
            "Connection removed"
        );
        Some(entry.state)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    #[cfg(test)]
    pub async fn group_size(&self, conversation_id: ConversationId) -> usize {
        self.inner
            .read()
            .await
            .groups
            .get(&conversation_id)
            .map(|g| g.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(user_id: UserId) -> ServerEvent {
        ServerEvent::Typing {
            user_id,
            is_typing: true,
        }
    }

    #[tokio::test]
    async fn test_join_and_remove() {
        let hub = ConnectionHub::new();
        let (conn, _rx) = hub.register().await;
        let conversation = ConversationId::new();
        let user = UserId::new();

        assert_eq!(hub.state(conn).await, Some(SessionState::Connected));
        hub.join_group(conn, conversation, user).await.unwrap();
        assert_eq!(hub.group_size(conversation).await, 1);

        let state = hub.remove(conn).await;
        assert_eq!(
            state,
            Some(SessionState::Joined {
                conversation_id: conversation,
                user_id: user
            })
        );
        assert_eq!(hub.group_size(conversation).await, 0);
        assert_eq!(hub.state(conn).await, None);
    }

    #[tokio::test]
    async fn test_second_join_rejected() {
        let hub = ConnectionHub::new();
        let (conn, _rx) = hub.register().await;
        let first = ConversationId::new();
        let user = UserId::new();

        hub.join_group(conn, first, user).await.unwrap();
        let err = hub
            .join_group(conn, ConversationId::new(), user)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AlreadyJoined { current } if current == first));
    }

    #[tokio::test]
    async fn test_join_unknown_connection() {
        let hub = ConnectionHub::new();
        let err = hub
            .join_group(ConnectionId::new(), ConversationId::new(), UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::UnknownConnection(_)));
    }

    #[tokio::test]
    async fn test_group_broadcast_skips_sender_and_outsiders() {
        let hub = ConnectionHub::new();
        let conversation = ConversationId::new();
        let (a, mut rx_a) = hub.register().await;
        let (b, mut rx_b) = hub.register().await;
        let (_outsider, mut rx_out) = hub.register().await;
        hub.join_group(a, conversation, UserId::new()).await.unwrap();
        hub.join_group(b, conversation, UserId::new()).await.unwrap();

        let user = UserId::new();
        let sent = hub.broadcast_group(conversation, typing(user), Some(a)).await;
        assert_eq!(sent, 1);

        assert_eq!(rx_b.try_recv().unwrap(), typing(user));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_all() {
        let hub = ConnectionHub::new();
        let (a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;

        let user = UserId::new();
        assert_eq!(hub.broadcast_all(typing(user), None).await, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        assert_eq!(hub.broadcast_all(typing(user), Some(a)).await, 1);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_removed_connection_stream_ends() {
        let hub = ConnectionHub::new();
        let (conn, mut rx) = hub.register().await;
        hub.send_to(conn, typing(UserId::new())).await;
        hub.remove(conn).await;

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
