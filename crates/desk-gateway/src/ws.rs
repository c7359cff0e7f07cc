use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use desk_core::orchestrator::Conversation;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;

use crate::protocol::{apology_frame, decode_inbound, encode_reply};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct WsParams {
    session_id: Option<String>,
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<WsParams>,
) -> Response {
    let session_id = params
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| peer.ip().to_string());
    let conversation = Arc::clone(&state.conversation);
    ws.on_upgrade(move |socket: WebSocket| async move {
        tracing::info!(session_id = %session_id, %peer, "realtime connection opened");
        let (sink, stream) = socket.split();
        run_session(stream, sink, &session_id, conversation).await;
        tracing::info!(session_id = %session_id, "realtime connection closed");
    })
}

/// Receive, process, reply; one message at a time until the client goes away.
///
/// A turn that panics, or a reply that cannot be encoded, gets one apology frame and
/// ends the loop.
pub(crate) async fn run_session<St, Si, E>(
    mut stream: St,
    mut sink: Si,
    session_id: &str,
    conversation: Arc<dyn Conversation>,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    Si: Sink<Message> + Unpin,
    E: std::fmt::Display,
{
    while let Some(frame) = stream.next().await {
        let raw = match frame {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(session_id, "receive failed: {e}");
                break;
            }
        };
        let Some(user_message) = decode_inbound(&raw) else {
            tracing::debug!(session_id, "ignoring empty message");
            continue;
        };

        let turn = {
            let conversation = Arc::clone(&conversation);
            let session_id = session_id.to_owned();
            tokio::spawn(async move { conversation.handle_turn(&session_id, &user_message).await })
        };

        let encoded = match turn.await {
            Ok(reply) => encode_reply(reply).map_err(|e| e.to_string()),
            Err(e) => Err(format!("turn task failed: {e}")),
        };

        match encoded {
            Ok(json) => {
                if sink.send(Message::Text(json.into())).await.is_err() {
                    tracing::debug!(session_id, "client went away before the reply was sent");
                    break;
                }
            }
            Err(e) => {
                tracing::error!(session_id, "realtime turn failed: {e}");
                let _ = sink.send(Message::Text(apology_frame().into())).await;
                break;
            }
        }
    }
}
