//! WebSocket transport for relay channels

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use courier_chats::UserId;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{RelayError, RelayResult};
use crate::state::{Flow, RelayHub};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// Upgrade `GET /ws`. A `token` query parameter authenticates the channel
/// up front; otherwise the client must send `authenticate` before the
/// handshake timeout.
pub async fn relay_websocket_handler(
    ws: WebSocketUpgrade,
    State(hub): State<RelayHub>,
    Query(query): Query<WebSocketQuery>,
) -> RelayResult<Response> {
    let identity = match query.token {
        Some(token) => Some(hub.verify(&token).await?),
        None => None,
    };

    Ok(ws.on_upgrade(move |socket| handle_relay_socket(socket, hub, identity)))
}

async fn handle_relay_socket(socket: WebSocket, hub: RelayHub, identity: Option<UserId>) {
    let (mut ws_sender, mut receiver) = socket.split();
    let (mut session, mut outbox) = hub.open_channel();
    let channel_id = session.id();

    let sender_task = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%channel_id, error = %err, "failed to encode frame");
                    continue;
                }
            };
            if let Err(err) = ws_sender.send(Message::Text(text)).await {
                debug!(%channel_id, error = %err, "websocket send failed");
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    let mut open = true;
    if let Some(user) = identity {
        if let Err(err) = hub.bind_identity(&mut session, user).await {
            open = hub.report(&session, err) == Flow::Continue;
        }
    }

    let handshake_deadline = Instant::now() + hub.settings().handshake_timeout;

    while open {
        let next = if session.identity().is_some() {
            receiver.next().await
        } else {
            match tokio::time::timeout_at(handshake_deadline, receiver.next()).await {
                Ok(frame) => frame,
                Err(_) => {
                    hub.report(&session, RelayError::HandshakeTimeout);
                    break;
                }
            }
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                debug!(%channel_id, error = %err, "websocket receive failed");
                break;
            }
            None => break,
        };

        let flow = match frame {
            Message::Text(text) => hub.handle_text(&mut session, &text).await,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => hub.handle_text(&mut session, text).await,
                Err(err) => hub.report(&session, RelayError::Malformed(err.to_string())),
            },
            Message::Close(_) => Flow::Close,
            Message::Ping(_) | Message::Pong(_) => Flow::Continue,
        };

        open = flow == Flow::Continue;
    }

    hub.disconnect(&session).await;
    drop(session);

    // Remaining queued frames (e.g. a final error) are flushed before the socket closes.
    if let Err(err) = sender_task.await {
        debug!(%channel_id, error = %err, "sender task ended abnormally");
    }
}
