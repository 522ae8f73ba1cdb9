//! WebSocket endpoint for reload clients.

use super::{ConnectionId, Outbound, ReloadChannel};
use crate::server::AppState;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};

/// Upgrade a request on the reserved socket path into a reload connection.
pub(crate) async fn handle_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    match state.reload.clone() {
        Some(channel) => ws.on_upgrade(move |socket| serve_connection(channel, socket)),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Pump one connection: registry queue out, pongs in.
async fn serve_connection(channel: ReloadChannel, socket: WebSocket) {
    let (id, mut outbound) = channel.register();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let message = match frame {
                    Some(Outbound::Event(json)) => Message::Text(json.into()),
                    Some(Outbound::Ping) => Message::Ping(Bytes::new()),
                    Some(Outbound::Close) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };

                if let Err(e) = sink.send(message).await {
                    tracing::debug!(id, error = %e, "reload client write failed");
                    break;
                }
            }
            incoming = stream.next() => {
                if !handle_incoming(&channel, id, incoming) {
                    break;
                }
            }
        }
    }

    channel.unregister(id);
}

/// Returns false once the connection is finished.
fn handle_incoming(
    channel: &ReloadChannel,
    id: ConnectionId,
    incoming: Option<Result<Message, axum::Error>>,
) -> bool {
    match incoming {
        Some(Ok(Message::Pong(_))) => {
            channel.mark_alive(id);
            true
        }
        Some(Ok(Message::Close(_))) | None => false,
        Some(Ok(_)) => true,
        Some(Err(e)) => {
            tracing::warn!(id, error = %e, "reload client socket error");
            false
        }
    }
}
