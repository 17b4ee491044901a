use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::{future, SinkExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::session::{run_session, Inbound};
use crate::error::CollabError;
use crate::models::{AuthResponseMessage, ClientMessage, ServerMessage};
use crate::services::auth_service::get_auth_token;
use crate::state::AppState;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// WebSocket endpoint for one document
pub async fn websocket_handler(
    Path(document_id): Path<String>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    debug!("New WebSocket connection attempt for document {}", document_id);
    let token = get_auth_token(&headers, params.token.as_deref()).ok();
    ws.on_upgrade(move |socket| handle_socket(socket, document_id, token, state))
}

async fn handle_socket(socket: WebSocket, document_id: String, token: Option<String>, state: AppState) {
    let (mut sink, stream) = socket.split();

    let admission = match state.gate.admit(&document_id, token.as_deref()).await {
        Ok(admission) => admission,
        Err(e) => {
            warn!("Refused connection to document {}: {}", document_id, e);
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, refuse(&mut sink, &e)).await.is_err() {
                debug!("Client for document {} did not take the refusal", document_id);
            }
            return;
        }
    };

    let settings = state.config.liveness();
    let (outbox, outbox_rx) = mpsc::channel(settings.outbox_capacity);
    let writer = tokio::spawn(write_frames(sink, outbox_rx));

    let welcome = ServerMessage::AuthResponse(AuthResponseMessage {
        success: true,
        message: format!("Connected as {}", admission.role),
    });
    if outbox.send(welcome).await.is_err() {
        finish_writer(writer, WRITER_DRAIN_TIMEOUT).await;
        return;
    }

    // Close frames and transport errors end the inbound stream.
    let inbound = Box::pin(
        stream
            .take_while(|frame| future::ready(matches!(frame, Ok(msg) if !matches!(msg, Message::Close(_)))))
            .filter_map(|frame| future::ready(frame.ok().and_then(decode))),
    );

    match run_session(state.registry.clone(), admission, settings, inbound, outbox.clone()).await {
        Ok(end) => debug!("WebSocket session for document {} finished: {:?}", document_id, end),
        Err(e) => {
            warn!("Session for document {} could not start: {}", document_id, e);
            let _ = outbox.try_send(ServerMessage::error(&e));
        }
    }

    drop(outbox);
    if !finish_writer(writer, WRITER_DRAIN_TIMEOUT).await {
        warn!("Writer for document {} did not drain in time, dropping the connection", document_id);
    }
    info!("WebSocket connection for document {} terminated", document_id);
}

fn decode(frame: Message) -> Option<Inbound> {
    match frame {
        Message::Text(text) => Some(match ClientMessage::parse(&text) {
            Ok(msg) => Inbound::Message(msg),
            Err(e) => Inbound::Malformed(e),
        }),
        Message::Binary(_) => Some(Inbound::Malformed(CollabError::InvalidOperation(
            "Binary frames are not supported".to_string(),
        ))),
        Message::Ping(_) | Message::Pong(_) => Some(Inbound::Heartbeat),
        Message::Close(_) => None,
    }
}

/// Drain the outbox to the socket, then close it.
async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut outbox: mpsc::Receiver<ServerMessage>) {
    while let Some(msg) = outbox.recv().await {
        let text = match serde_json::to_string(&msg) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize outbound message: {}", e);
                continue;
            }
        };
        if sink.send(Message::Text(text)).await.is_err() {
            debug!("Client went away while sending");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

/// Wait for the writer to flush and close the socket. A writer still stuck after `limit` is
/// aborted, which drops the socket. Returns whether it finished on its own.
async fn finish_writer(mut writer: JoinHandle<()>, limit: Duration) -> bool {
    match tokio::time::timeout(limit, &mut writer).await {
        Ok(_) => true,
        Err(_) => {
            writer.abort();
            false
        }
    }
}

/// Tell the client why it was refused and close with a matching code.
async fn refuse(sink: &mut SplitSink<WebSocket, Message>, err: &CollabError) {
    let response = ServerMessage::AuthResponse(AuthResponseMessage {
        success: false,
        message: err.to_string(),
    });
    match serde_json::to_string(&response) {
        Ok(text) => {
            let _ = sink.send(Message::Text(text)).await;
        }
        Err(e) => error!("Failed to serialize auth response: {}", e),
    }
    let frame = CloseFrame {
        code: err.close_code(),
        reason: err.code().into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_frames() {
        assert!(matches!(
            decode(Message::Text(r#"{"type":"ping","payload":{"time":1}}"#.to_string())),
            Some(Inbound::Message(ClientMessage::Ping(_)))
        ));
        assert!(matches!(decode(Message::Text("{".to_string())), Some(Inbound::Malformed(_))));
        assert!(matches!(decode(Message::Binary(vec![1, 2])), Some(Inbound::Malformed(_))));
        assert!(matches!(decode(Message::Ping(vec![])), Some(Inbound::Heartbeat)));
        assert!(decode(Message::Close(None)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_writer_is_aborted() {
        let (held, released) = tokio::sync::oneshot::channel::<()>();
        let writer = tokio::spawn(async move {
            let _held = held;
            future::pending::<()>().await;
        });

        assert!(!finish_writer(writer, WRITER_DRAIN_TIMEOUT).await);
        // Aborting drops everything the writer owned.
        assert!(released.await.is_err());
    }

    #[tokio::test]
    async fn test_finished_writer_is_awaited() {
        let writer = tokio::spawn(async {});
        assert!(finish_writer(writer, WRITER_DRAIN_TIMEOUT).await);
    }
}
