//! Realtime session handling.
//!
//! Each connection moves `Connected -> Joined(conversation, user) -> Closed`.
//! The manager ties the presence registry, the connection hub and the chat
//! store together; the WebSocket layer only parses frames and calls in here.

use std::sync::Arc;

use souk_shared::{ClientEvent, ConnectionId, ConversationId, MessagePayload, ServerEvent, UserId};
use souk_store::Database;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::error::ChatError;
use crate::hub::ConnectionHub;
use crate::presence::PresenceRegistry;

/// The chat store, shared by every task.
pub type SharedDatabase = Arc<Mutex<Database>>;

#[derive(Clone)]
pub struct SessionManager {
    db: SharedDatabase,
    presence: PresenceRegistry,
    hub: ConnectionHub,
}

impl SessionManager {
    pub fn new(db: SharedDatabase, presence: PresenceRegistry, hub: ConnectionHub) -> Self {
        Self { db, presence, hub }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// Open a session for a freshly accepted connection.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        self.hub.register().await
    }

    /// Route one client event to its handler.
    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), ChatError> {
        match event {
            ClientEvent::Join { user_id, chat_id } => {
                self.on_join(connection_id, user_id, chat_id).await
            }
            ClientEvent::SendMessage {
                chat_id,
                sender_id,
                message,
            } => self
                .on_send_message(chat_id, sender_id, &message)
                .await
                .map(|_| ()),
            ClientEvent::Typing {
                chat_id,
                user_id,
                is_typing,
            } => {
                self.on_typing(connection_id, chat_id, user_id, is_typing)
                    .await;
                Ok(())
            }
            ClientEvent::UserOnline {
                chat_id,
                user_id,
                online,
            } => {
                self.on_user_online(connection_id, chat_id, user_id, online)
                    .await;
                Ok(())
            }
        }
    }

    /// Join a conversation.
    ///
    /// On success the joining connection receives the full history followed
    /// by one `user online` event per other participant, and the rest of the
    /// conversation learns that `user_id` is online. Fails without side
    /// effects if the conversation does not exist or this connection already
    /// joined one.
    ///
    /// The store stays locked until the history is queued, so every message
    /// reaches the joiner exactly once: in the history or as `new message`.
    pub async fn on_join(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        conversation_id: ConversationId,
    ) -> Result<(), ChatError> {
        let db = self.db.lock().await;
        let conversation = db
            .get_conversation(conversation_id)
            .map_err(|e| ChatError::from_store(conversation_id, e))?;
        let history = db
            .get_messages_for_conversation(conversation_id)
            .map_err(|e| ChatError::from_store(conversation_id, e))?;

        self.hub
            .join_group(connection_id, conversation_id, user_id)
            .await?;
        self.presence.join(user_id, connection_id).await;

        self.hub
            .broadcast_group(
                conversation_id,
                ServerEvent::UserOnline {
                    user_id,
                    online: true,
                },
                Some(connection_id),
            )
            .await;

        let history_len = history.len();
        self.hub
            .send_to(
                connection_id,
                ServerEvent::ChatHistory(history.into_iter().map(MessagePayload::from).collect()),
            )
            .await;
        drop(db);

        for participant in conversation.other_participants(user_id) {
            let online = self.presence.is_online(participant).await;
            self.hub
                .send_to(
                    connection_id,
                    ServerEvent::UserOnline {
                        user_id: participant,
                        online,
                    },
                )
                .await;
        }

        info!(
            user = %user_id,
            conversation = %conversation_id,
            history = history_len,
            "User joined conversation"
        );
        Ok(())
    }

    /// Persist a message and broadcast it to every subscriber of the
    /// conversation, the sender's own connections included.
    ///
    /// Broadcast happens under the store lock, so subscribers see messages in
    /// log order. The sender is not checked against the participant list.
    pub async fn on_send_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        body: &str,
    ) -> Result<MessagePayload, ChatError> {
        let mut db = self.db.lock().await;
        let message = db
            .append_message(conversation_id, sender_id, body)
            .map_err(|e| ChatError::from_store(conversation_id, e))?;

        let payload = MessagePayload::from(message);
        let delivered = self
            .hub
            .broadcast_group(
                conversation_id,
                ServerEvent::NewMessage(payload.clone()),
                None,
            )
            .await;
        drop(db);

        debug!(
            conversation = %conversation_id,
            message = %payload.id,
            recipients = delivered,
            "Message broadcast"
        );
        Ok(payload)
    }

    /// Relay a typing indicator to the other subscribers. Not persisted.
    pub async fn on_typing(
        &self,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    ) -> usize {
        self.hub
            .broadcast_group(
                conversation_id,
                ServerEvent::Typing { user_id, is_typing },
                Some(connection_id),
            )
            .await
    }

    /// Relay an explicit presence override to the other subscribers. The
    /// presence registry is left untouched.
    pub async fn on_user_online(
        &self,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
        user_id: UserId,
        online: bool,
    ) -> usize {
        self.hub
            .broadcast_group(
                conversation_id,
                ServerEvent::UserOnline { user_id, online },
                Some(connection_id),
            )
            .await
    }

    /// Close a session. If the connection was a user's active presence, that
    /// user goes offline and every remaining connection is told so.
    pub async fn on_disconnect(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.hub.remove(connection_id).await;

        let user_id = self.presence.leave(connection_id).await?;
        let notified = self
            .hub
            .broadcast_all(
                ServerEvent::UserOnline {
                    user_id,
                    online: false,
                },
                None,
            )
            .await;

        info!(user = %user_id, notified, "User went offline");
        Some(user_id)
    }

    /// Tell a connection its transport failed.
    pub async fn report_transport_error(&self, connection_id: ConnectionId, error: &str) {
        self.hub
            .send_to(
                connection_id,
                ServerEvent::ConnectionError {
                    message: "Socket connection error".to_string(),
                    error: error.to_string(),
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use souk_store::User;

    struct Fixture {
        sessions: SessionManager,
        db: SharedDatabase,
        alice: User,
        bob: User,
        chat: ConversationId,
    }

    async fn fixture() -> Fixture {
        let mut db = Database::open_in_memory().unwrap();
        let alice = db.create_user("Alice", "A", "alice@example.com").unwrap();
        let bob = db.create_user("Bob", "B", "bob@example.com").unwrap();
        let chat = db.create_conversation(&[alice.id, bob.id]).unwrap().id;

        let db = Arc::new(Mutex::new(db));
        let sessions = SessionManager::new(db.clone(), PresenceRegistry::new(), ConnectionHub::new());
        Fixture {
            sessions,
            db,
            alice,
            bob,
            chat,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_join_empty_conversation() {
        let f = fixture().await;
        let (conn, mut rx) = f.sessions.connect().await;

        f.sessions.on_join(conn, f.alice.id, f.chat).await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                ServerEvent::ChatHistory(vec![]),
                ServerEvent::UserOnline {
                    user_id: f.bob.id,
                    online: false
                },
            ]
        );
        assert!(f.sessions.presence().is_online(f.alice.id).await);
    }

    #[tokio::test]
    async fn test_join_returns_history_in_order() {
        let f = fixture().await;
        {
            let mut db = f.db.lock().await;
            for body in ["one", "two", "three"] {
                db.append_message(f.chat, f.bob.id, body).unwrap();
            }
        }

        let (conn, mut rx) = f.sessions.connect().await;
        f.sessions.on_join(conn, f.alice.id, f.chat).await.unwrap();

        match drain(&mut rx).into_iter().next() {
            Some(ServerEvent::ChatHistory(history)) => {
                let bodies: Vec<_> = history.iter().map(|m| m.message.as_str()).collect();
                assert_eq!(bodies, vec!["one", "two", "three"]);
            }
            other => panic!("expected chat history, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_notifies_peers_and_reports_their_status() {
        let f = fixture().await;
        let (bob_conn, mut bob_rx) = f.sessions.connect().await;
        f.sessions.on_join(bob_conn, f.bob.id, f.chat).await.unwrap();
        drain(&mut bob_rx);

        let (alice_conn, mut alice_rx) = f.sessions.connect().await;
        f.sessions.on_join(alice_conn, f.alice.id, f.chat).await.unwrap();

        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::UserOnline {
                user_id: f.alice.id,
                online: true
            }]
        );
        assert!(drain(&mut alice_rx).contains(&ServerEvent::UserOnline {
            user_id: f.bob.id,
            online: true
        }));
    }

    #[tokio::test]
    async fn test_join_unknown_conversation() {
        let f = fixture().await;
        let (conn, mut rx) = f.sessions.connect().await;
        let missing = ConversationId::new();

        let err = f.sessions.on_join(conn, f.alice.id, missing).await.unwrap_err();
        assert!(matches!(err, ChatError::ConversationNotFound(id) if id == missing));
        assert!(drain(&mut rx).is_empty());
        assert!(!f.sessions.presence().is_online(f.alice.id).await);
    }

    #[tokio::test]
    async fn test_rejoin_is_rejected() {
        let f = fixture().await;
        let other_chat = {
            let mut db = f.db.lock().await;
            let carol = db.create_user("Carol", "C", "carol@example.com").unwrap();
            db.create_conversation(&[f.alice.id, carol.id]).unwrap().id
        };

        let (conn, _rx) = f.sessions.connect().await;
        f.sessions.on_join(conn, f.alice.id, f.chat).await.unwrap();

        let err = f
            .sessions
            .on_join(conn, f.alice.id, other_chat)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AlreadyJoined { current } if current == f.chat));
        assert_eq!(f.sessions.hub().group_size(other_chat).await, 0);
    }

    #[tokio::test]
    async fn test_send_reaches_everyone_including_sender() {
        let f = fixture().await;
        let (alice_conn, mut alice_rx) = f.sessions.connect().await;
        let (bob_conn, mut bob_rx) = f.sessions.connect().await;
        f.sessions.on_join(alice_conn, f.alice.id, f.chat).await.unwrap();
        f.sessions.on_join(bob_conn, f.bob.id, f.chat).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let sent = f
            .sessions
            .on_send_message(f.chat, f.alice.id, "hi")
            .await
            .unwrap();
        assert_eq!(sent.message, "hi");
        assert_eq!(sent.sender_id, f.alice.id);

        assert_eq!(drain(&mut bob_rx), vec![ServerEvent::NewMessage(sent.clone())]);
        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::NewMessage(sent.clone())]);

        let threads = f.db.lock().await.thread_summaries(f.bob.id).unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].conversation_id, f.chat);
        assert_eq!(threads[0].last_message.body, "hi");
    }

    #[tokio::test]
    async fn test_send_to_unknown_conversation() {
        let f = fixture().await;
        let missing = ConversationId::new();
        let err = f
            .sessions
            .on_send_message(missing, f.alice.id, "hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ConversationNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_concurrent_sends_both_persist() {
        let f = fixture().await;
        let before = f.db.lock().await.count_messages(f.chat).unwrap();

        let (a, b) = tokio::join!(
            f.sessions.on_send_message(f.chat, f.alice.id, "from alice"),
            f.sessions.on_send_message(f.chat, f.bob.id, "from bob"),
        );
        a.unwrap();
        b.unwrap();

        let after = f.db.lock().await.count_messages(f.chat).unwrap();
        assert_eq!(after, before + 2);
    }

    #[tokio::test]
    async fn test_many_parallel_sends_lose_nothing() {
        let f = fixture().await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let sessions = f.sessions.clone();
            let sender = if i % 2 == 0 { f.alice.id } else { f.bob.id };
            let chat = f.chat;
            handles.push(tokio::spawn(async move {
                sessions.on_send_message(chat, sender, &format!("m{i}")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let log = f.db.lock().await.get_messages_for_conversation(f.chat).unwrap();
        assert_eq!(log.len(), 20);
        assert!(log.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_typing_and_presence_override_skip_origin() {
        let f = fixture().await;
        let (alice_conn, mut alice_rx) = f.sessions.connect().await;
        let (bob_conn, mut bob_rx) = f.sessions.connect().await;
        f.sessions.on_join(alice_conn, f.alice.id, f.chat).await.unwrap();
        f.sessions.on_join(bob_conn, f.bob.id, f.chat).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        assert_eq!(f.sessions.on_typing(alice_conn, f.chat, f.alice.id, true).await, 1);
        assert_eq!(
            f.sessions
                .on_user_online(alice_conn, f.chat, f.alice.id, false)
                .await,
            1
        );

        assert_eq!(
            drain(&mut bob_rx),
            vec![
                ServerEvent::Typing {
                    user_id: f.alice.id,
                    is_typing: true
                },
                ServerEvent::UserOnline {
                    user_id: f.alice.id,
                    online: false
                },
            ]
        );
        assert!(drain(&mut alice_rx).is_empty());
        // The override is a relay only.
        assert!(f.sessions.presence().is_online(f.alice.id).await);
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_offline_once_globally() {
        let f = fixture().await;
        let (alice_conn, _alice_rx) = f.sessions.connect().await;
        f.sessions.on_join(alice_conn, f.alice.id, f.chat).await.unwrap();

        // Not in Alice's conversation at all.
        let (_idle_conn, mut idle_rx) = f.sessions.connect().await;

        assert_eq!(f.sessions.on_disconnect(alice_conn).await, Some(f.alice.id));
        assert!(!f.sessions.presence().is_online(f.alice.id).await);
        assert_eq!(
            drain(&mut idle_rx),
            vec![ServerEvent::UserOnline {
                user_id: f.alice.id,
                online: false
            }]
        );

        assert_eq!(f.sessions.on_disconnect(alice_conn).await, None);
        assert!(drain(&mut idle_rx).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_without_join_is_silent() {
        let f = fixture().await;
        let (conn, _rx) = f.sessions.connect().await;
        let (_other, mut other_rx) = f.sessions.connect().await;

        assert_eq!(f.sessions.on_disconnect(conn).await, None);
        assert!(drain(&mut other_rx).is_empty());
        assert_eq!(f.sessions.hub().connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_dispatch_routes_events() {
        let f = fixture().await;
        let (conn, mut rx) = f.sessions.connect().await;

        f.sessions
            .dispatch(
                conn,
                ClientEvent::Join {
                    user_id: f.alice.id,
                    chat_id: f.chat,
                },
            )
            .await
            .unwrap();
        f.sessions
            .dispatch(
                conn,
                ClientEvent::SendMessage {
                    chat_id: f.chat,
                    sender_id: f.alice.id,
                    message: "via dispatch".into(),
                },
            )
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(ServerEvent::NewMessage(m)) if m.message == "via dispatch"
        ));
    }

    #[tokio::test]
    async fn test_transport_error_is_reported() {
        let f = fixture().await;
        let (conn, mut rx) = f.sessions.connect().await;

        f.sessions.report_transport_error(conn, "reset by peer").await;
        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::ConnectionError {
                message: "Socket connection error".into(),
                error: "reset by peer".into()
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_join_racing_send_sees_message_once() {
        let f = fixture().await;

        for i in 0..200 {
            let (conn, mut rx) = f.sessions.connect().await;
            let join = {
                let sessions = f.sessions.clone();
                let (user, chat) = (f.bob.id, f.chat);
                tokio::spawn(async move { sessions.on_join(conn, user, chat).await })
            };
            let send = {
                let sessions = f.sessions.clone();
                let (sender, chat) = (f.alice.id, f.chat);
                tokio::spawn(async move {
                    sessions.on_send_message(chat, sender, &format!("m{i}")).await
                })
            };
            join.await.unwrap().unwrap();
            let sent = send.await.unwrap().unwrap();

            let seen = drain(&mut rx)
                .into_iter()
                .map(|event| match event {
                    ServerEvent::ChatHistory(history) => {
                        history.iter().filter(|m| m.id == sent.id).count()
                    }
                    ServerEvent::NewMessage(m) if m.id == sent.id => 1,
                    _ => 0,
                })
                .sum::<usize>();
            assert_eq!(seen, 1, "iteration {i}");

            f.sessions.on_disconnect(conn).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_broadcast_order_matches_log_order() {
        let f = fixture().await;
        let (conn, mut rx) = f.sessions.connect().await;
        f.sessions.on_join(conn, f.bob.id, f.chat).await.unwrap();
        drain(&mut rx);

        let mut handles = Vec::new();
        for i in 0..50 {
            let sessions = f.sessions.clone();
            let (sender, chat) = (f.alice.id, f.chat);
            handles.push(tokio::spawn(async move {
                sessions.on_send_message(chat, sender, &format!("m{i}")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let delivered: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::NewMessage(m) => Some(m.id),
                _ => None,
            })
            .collect();
        let logged: Vec<_> = f
            .db
            .lock()
            .await
            .get_messages_for_conversation(f.chat)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(delivered, logged);
    }
}
