//! `GET /updates`: WebSocket stream of encoded `Update` frames.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use super::AppState;
use crate::network::OutboundMessage;
use crate::service::{ValuesTask, WorkerHandle};

/// Upgrades to a WebSocket that receives every published `Update`.
///
/// Subscribers are read-only; inbound text and binary frames are ignored.
/// Refused with 503 once the server is draining.
pub async fn updates_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| serve_subscriber(socket, state))
        .into_response()
}

async fn serve_subscriber(socket: WebSocket, state: AppState) {
    let (handle, mut outbound) = state.connections.register(&state.config.connection);
    let id = handle.id;
    debug!(connection = id.0, "update subscriber connected");

    request_resync(state.dispatch.values.as_ref(), id.0);

    let send_timeout = state.config.connection.send_timeout;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(OutboundMessage::Binary(bytes)) => {
                    let sent = tokio::time::timeout(
                        send_timeout,
                        sink.send(Message::Binary(bytes)),
                    )
                    .await;
                    if !matches!(sent, Ok(Ok(()))) {
                        debug!(connection = id.0, "update subscriber send failed");
                        break;
                    }
                }
                Some(OutboundMessage::Close(reason)) => {
                    let frame = CloseFrame {
                        code: close_code::AWAY,
                        reason: reason.unwrap_or_default().into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.connections.remove(id);
    debug!(connection = id.0, "update subscriber disconnected");
}

/// Asks the values worker for a full snapshot, since a fresh subscriber has
/// no baseline to apply diffs to. `false` if no snapshot will come.
fn request_resync(values: Option<&WorkerHandle<ValuesTask>>, connection: u64) -> bool {
    let queued = values.is_some_and(|values| values.try_submit(ValuesTask::Resync));
    if !queued {
        debug!(connection, "values worker unavailable, no resync for subscriber");
    }
    queued
}
