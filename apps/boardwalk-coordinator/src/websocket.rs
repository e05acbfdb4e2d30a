use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use boardwalk_core::{ErrorCode, ServerEnvelope};
use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coordinator::{DisconnectReason, OutboundFrame};
use crate::AppState;

/// How long the writer may take to drain after the reader stops.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !is_valid_session_id(&session_id) {
        return (StatusCode::BAD_REQUEST, "invalid session id").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Session ids are opaque but end up in store keys and metric labels.
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<OutboundFrame>(state.registry.config().connection_buffer);

    let (handle, player) = match state
        .registry
        .connect(&session_id, &connection_id, outbound_tx)
        .await
    {
        Ok(joined) => joined,
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "rejecting connection");
            let frame = ServerEnvelope::error(ErrorCode::SessionUnavailable, err.to_string(), None);
            if let Ok(text) = serde_json::to_string(&frame) {
                let _ = ws_tx.send(Message::Text(text)).await;
            }
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::AGAIN,
                    reason: Cow::Borrowed("session unavailable"),
                })))
                .await;
            return;
        }
    };

    info!(
        session_id = %session_id,
        connection_id = %connection_id,
        player_id = %player.id,
        "websocket connected"
    );

    // Ends when the actor drops its sender (removal or eviction) or the
    // socket stops accepting writes.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if ws_tx.send(Message::Text(frame.to_string())).await.is_err() {
                return DisconnectReason::TransportError;
            }
        }
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: Cow::Borrowed("removed from session"),
            })))
            .await;
        DisconnectReason::SlowConsumer
    });

    let idle_timeout = state.idle_timeout;
    let reason = loop {
        tokio::select! {
            exit = &mut writer => break exit.unwrap_or(DisconnectReason::TransportError),
            next = timeout(idle_timeout, ws_rx.next()) => match next {
                Err(_) => break DisconnectReason::IdleTimeout,
                Ok(None) => break DisconnectReason::ClientClosed,
                Ok(Some(Err(err))) => {
                    debug!(
                        session_id = %session_id,
                        connection_id = %connection_id,
                        error = %err,
                        "websocket receive error"
                    );
                    break DisconnectReason::TransportError;
                }
                Ok(Some(Ok(message))) => match message {
                    Message::Text(text) => {
                        if handle.frame(&connection_id, text).await.is_err() {
                            break DisconnectReason::TransportError;
                        }
                    }
                    Message::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if handle.frame(&connection_id, text).await.is_err() {
                                break DisconnectReason::TransportError;
                            }
                        }
                        Err(_) => {
                            debug!(
                                session_id = %session_id,
                                connection_id = %connection_id,
                                "dropping non-utf8 binary frame"
                            );
                        }
                    },
                    Message::Close(_) => break DisconnectReason::ClientClosed,
                    Message::Ping(_) | Message::Pong(_) => {}
                },
            },
        }
    };

    handle.disconnect(&connection_id, reason).await;
    if !writer.is_finished() && timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(
        session_id = %session_id,
        connection_id = %connection_id,
        reason = reason.as_str(),
        "websocket closed"
    );
}
