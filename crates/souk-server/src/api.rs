use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use souk_shared::constants::USER_ID_HEADER;
use souk_shared::{ConversationId, MessagePayload, UserId};
use souk_store::{Conversation, PublicProfile, ThreadSummary};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::session::{SessionManager, SharedDatabase};
use crate::threads::ThreadQueryService;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDatabase,
    pub sessions: SessionManager,
    pub threads: ThreadQueryService,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.cors_allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/users", post(create_user))
        .route("/chat", get(chat_threads))
        .route("/chat/chat-id/:id", get(chat_id_for_users))
        .route("/chat/new-users", get(new_users))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Current user ───

/// The caller's identity, taken from the header the upstream auth layer
/// sets after validating the session.
pub struct CurrentUser(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ServerError::Unauthorized)?;

        UserId::parse(value)
            .map(CurrentUser)
            .map_err(|_| ServerError::Unauthorized)
    }
}

// ─── DTOs ───

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    name: String,
    version: &'static str,
    online_users: usize,
    connections: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDto {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
}

impl From<PublicProfile> for ProfileDto {
    fn from(p: PublicProfile) -> Self {
        Self {
            id: p.id,
            first_name: p.first_name,
            last_name: p.last_name,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDto {
    pub id: ConversationId,
    pub last_message: MessagePayload,
    pub user: ProfileDto,
}

impl From<ThreadSummary> for ThreadDto {
    fn from(t: ThreadSummary) -> Self {
        Self {
            id: t.conversation_id,
            last_message: t.last_message.into(),
            user: t.user.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationDto {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            participants: c.participants,
            created_at: c.created_at,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest {
    first_name: String,
    last_name: String,
    email: String,
}

// ─── Handlers ───

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_users: state.sessions.presence().online_count().await,
        connections: state.sessions.hub().connection_count().await,
    })
}

/// Register a chat profile. Credentials are handled by the auth service.
async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ProfileDto>), ServerError> {
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ServerError::BadRequest("firstName and lastName are required".into()));
    }
    if !req.email.contains('@') {
        return Err(ServerError::BadRequest("email is invalid".into()));
    }

    let user = state
        .db
        .lock()
        .await
        .create_user(&req.first_name, &req.last_name, &req.email)?;

    info!(user = %user.id, "User profile created");
    Ok((StatusCode::CREATED, Json(user.public_profile().into())))
}

/// Inbox: the caller's conversations with their latest message.
async fn chat_threads(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<ThreadDto>>, ServerError> {
    let threads = state.threads.get_threads(user_id).await?;
    Ok(Json(threads.into_iter().map(ThreadDto::from).collect()))
}

/// Conversation between the caller and `:id`, created on first contact.
async fn chat_id_for_users(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(other): Path<String>,
) -> Result<Json<ConversationDto>, ServerError> {
    let other_id = UserId::parse(&other)
        .map_err(|e| ServerError::BadRequest(format!("Invalid user id: {e}")))?;
    if other_id == user_id {
        return Err(ServerError::BadRequest("Cannot open a chat with yourself".into()));
    }

    let conversation = state.threads.conversation_with(user_id, other_id).await?;
    Ok(Json(conversation.into()))
}

async fn new_users(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<ProfileDto>>, ServerError> {
    let users = state.threads.new_users(user_id).await?;
    Ok(Json(users.into_iter().map(ProfileDto::from).collect()))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
