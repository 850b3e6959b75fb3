//! WebSocket transport for the realtime event surface.
//!
//! One task per connection: inbound frames are parsed and dispatched in
//! arrival order while a companion task drains the connection's outbound
//! queue into the socket.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use souk_shared::ClientEvent;
use tracing::{debug, warn};

use crate::api::AppState;
use crate::error::ChatError;
use crate::session::SessionManager;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.sessions))
}

async fn handle_socket(socket: WebSocket, sessions: SessionManager) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (connection_id, mut events) = sessions.connect().await;

    // Ends when the hub drops this connection's sender, after the queue is
    // drained, or when the socket stops accepting writes.
    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match event.to_json() {
                Ok(j) => j,
                Err(e) => {
                    warn!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let result = match ClientEvent::from_json(&text) {
                    Ok(event) => sessions.dispatch(connection_id, event).await,
                    Err(e) => Err(ChatError::from(e)),
                };
                if let Err(e) = result {
                    log_swallowed(connection_id, &e);
                }
            }
            Ok(WsMessage::Close(_)) => break,
            // Ping/pong is answered by axum; binary frames are not part of
            // the protocol.
            Ok(_) => {}
            Err(e) => {
                sessions
                    .report_transport_error(connection_id, &e.to_string())
                    .await;
                break;
            }
        }
    }

    sessions.on_disconnect(connection_id).await;
    if let Err(e) = send_task.await {
        warn!(conn = %connection_id.short(), error = %e, "Send task failed");
    }
}

fn log_swallowed(connection_id: souk_shared::ConnectionId, err: &ChatError) {
    match err {
        ChatError::Persistence(_) => {
            warn!(conn = %connection_id.short(), error = %err, "Event failed")
        }
        _ => debug!(conn = %connection_id.short(), error = %err, "Event rejected"),
    }
}
