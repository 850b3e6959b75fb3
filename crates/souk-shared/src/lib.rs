//! # souk-shared
//!
//! Types shared between the chat store and the realtime server: identifier
//! newtypes, the JSON event protocol spoken over the WebSocket, and a few
//! constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{ClientEvent, MessagePayload, ServerEvent};
pub use types::{ConnectionId, ConversationId, MessageId, UserId};
