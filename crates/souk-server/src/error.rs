use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use souk_shared::{ConnectionId, ConversationId, ProtocolError};
use souk_store::StoreError;
use thiserror::Error;

/// Errors from realtime event handling.
///
/// The WebSocket transport logs these instead of sending them to the client.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Connection already joined conversation {current}")]
    AlreadyJoined { current: ConversationId },

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Invalid event: {0}")]
    Validation(#[from] ProtocolError),
}

impl ChatError {
    /// Map a store error raised while touching `conversation_id`.
    pub fn from_store(conversation_id: ConversationId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ChatError::ConversationNotFound(conversation_id),
            other => ChatError::Persistence(other),
        }
    }
}

/// Errors returned by the HTTP API.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Missing or invalid user identity")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound("Record not found".into()),
            StoreError::AlreadyExists(what) => ServerError::Conflict(what),
            StoreError::InvalidParticipants(msg) => ServerError::BadRequest(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<ChatError> for ServerError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Persistence(store) => store.into(),
            ChatError::ConversationNotFound(id) => {
                ServerError::NotFound(format!("conversation {id}"))
            }
            other => ServerError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
