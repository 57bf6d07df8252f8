//! Live counters: point query and WebSocket stream
//!
//! A stream starts with a `stats_update` snapshot, then relays every
//! `click_event` / `stats_update` pair the hub pushes for the link. When the
//! hub disconnects a slow subscriber the socket is closed and the client is
//! expected to reconnect, which re-syncs it from a fresh snapshot.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    Json,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::realtime::{RealtimeMessage, RealtimeSnapshot};

use super::handlers::{path_short_code, AppState};

/// Current counters of a link; zeroed when it has no clicks since start
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
) -> AppResult<Json<RealtimeSnapshot>> {
    let short_code = path_short_code(&short_code)?;
    Ok(Json(state.realtime.snapshot(&short_code)))
}

/// WebSocket upgrade handler for one link's live stream
pub async fn realtime_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
) -> AppResult<Response> {
    let short_code = path_short_code(&short_code)?;
    Ok(ws.on_upgrade(move |socket| stream_link(socket, state, short_code)))
}

type SocketSender = SplitSink<WebSocket, Message>;

async fn send_message(sender: &mut SocketSender, message: &RealtimeMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize realtime message");
            return true;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

async fn stream_link(socket: WebSocket, state: Arc<AppState>, short_code: String) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before taking the snapshot so no click falls in between
    let mut subscription = state.realtime.subscribe(&short_code);
    let initial = RealtimeMessage::StatsUpdate(state.realtime.snapshot(&short_code));
    if !send_message(&mut sender, &initial).await {
        return;
    }
    debug!(short_code = %short_code, "Realtime stream opened");

    loop {
        tokio::select! {
            message = subscription.recv() => {
                match message {
                    Some(message) => {
                        if !send_message(&mut sender, &message).await {
                            break;
                        }
                    }
                    None => {
                        debug!(short_code = %short_code, "Subscriber dropped by hub, closing stream");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // The stream is server-to-client; pings are answered by axum
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    debug!(short_code = %short_code, "Realtime stream closed");
}
