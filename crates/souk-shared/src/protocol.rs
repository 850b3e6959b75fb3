//! Realtime event protocol.
//!
//! Every frame is a JSON text frame shaped `{"event": "<name>", "data": ...}`.
//! Event names contain spaces (`"send message"`, `"user online"`) because
//! that is what existing browser clients emit; payload fields are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{ConversationId, MessageId, UserId};

/// Events a client sends to the server.
///
/// Transport-level disconnects are not an event; the socket task observes
/// them directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Register presence and subscribe to a conversation.
    #[serde(rename = "join", rename_all = "camelCase")]
    Join {
        user_id: UserId,
        chat_id: ConversationId,
    },

    /// Persist a message and broadcast it to the conversation.
    #[serde(rename = "send message", rename_all = "camelCase")]
    SendMessage {
        chat_id: ConversationId,
        sender_id: UserId,
        message: String,
    },

    /// Typing indicator, relayed without persistence.
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        chat_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },

    /// Explicit presence override, relayed to the conversation.
    #[serde(rename = "user online", rename_all = "camelCase")]
    UserOnline {
        chat_id: ConversationId,
        user_id: UserId,
        online: bool,
    },
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn conversation_id(&self) -> ConversationId {
        match self {
            ClientEvent::Join { chat_id, .. }
            | ClientEvent::SendMessage { chat_id, .. }
            | ClientEvent::Typing { chat_id, .. }
            | ClientEvent::UserOnline { chat_id, .. } => *chat_id,
        }
    }
}

/// Events the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full message log of the joined conversation, in append order.
    #[serde(rename = "chat history")]
    ChatHistory(Vec<MessagePayload>),

    #[serde(rename = "new message")]
    NewMessage(MessagePayload),

    #[serde(rename = "user online", rename_all = "camelCase")]
    UserOnline { user_id: UserId, online: bool },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { user_id: UserId, is_typing: bool },

    /// Transport fault on the receiving connection.
    #[serde(rename = "connection error")]
    ConnectionError { message: String, error: String },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire name of the event, used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ChatHistory(_) => "chat history",
            ServerEvent::NewMessage(_) => "new message",
            ServerEvent::UserOnline { .. } => "user online",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::ConnectionError { .. } => "connection error",
        }
    }
}

/// A chat message as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub chat_id: ConversationId,
    pub sender_id: UserId,
    /// Message body.
    pub message: String,
    /// Server-assigned at append time.
    pub timestamp: DateTime<Utc>,
    pub delivered: bool,
    pub read: bool,
}
