/// Application name
pub const APP_NAME: &str = "Souk Chat";

/// Default HTTP/WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Default SQLite database file name
pub const DEFAULT_DATABASE_FILE: &str = "souk.db";

/// Header carrying the authenticated user id, set by the upstream auth layer
pub const USER_ID_HEADER: &str = "x-user-id";

/// Participants in a direct conversation
pub const DIRECT_CONVERSATION_SIZE: usize = 2;
