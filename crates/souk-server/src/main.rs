//! # souk-server
//!
//! Realtime chat server for the Souk marketplace.
//!
//! This binary provides:
//! - **WebSocket event surface** (`/ws`) for joining conversations, sending
//!   messages, typing indicators and presence
//! - **Presence registry** tracking which connection represents each online
//!   user, in memory only
//! - **Read-side REST API** (axum) for the inbox, fetch-or-create of a
//!   conversation and candidate new contacts
//! - **SQLite chat store** with atomic, append-only message logs

mod api;
mod config;
mod error;
mod hub;
mod presence;
mod session;
mod threads;
mod ws;

use std::sync::Arc;

use souk_store::Database;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::ConnectionHub;
use crate::presence::PresenceRegistry;
use crate::session::SessionManager;
use crate::threads::ThreadQueryService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,souk_server=debug,souk_store=debug")),
        )
        .init();

    info!("Starting Souk chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Arc::new(Mutex::new(Database::open_at(&config.database_path)?));

    // Lives exactly as long as the server; cleared on shutdown below.
    let presence = PresenceRegistry::new();
    let sessions = SessionManager::new(db.clone(), presence.clone(), ConnectionHub::new());
    let threads = ThreadQueryService::new(db.clone());

    let http_addr = config.http_addr;
    let app_state = AppState {
        db,
        sessions,
        threads,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP/WebSocket server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "HTTP server failed");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    let online = presence.online_count().await;
    presence.clear().await;
    info!(dropped = online, "Presence registry cleared");

    result
}
