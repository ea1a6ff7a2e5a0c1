//! WebSocket handler for live view push
//!
//! Clients connect to /api/v1/ws and receive a `ViewUpdate` right away,
//! then one per refresh period while the view keeps changing.

use crate::{AppState, ViewSnapshot};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use callscope_core::PlaybackState;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;

/// Message pushed to presentation clients
#[derive(Serialize)]
pub struct ViewUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(flatten)]
    pub view: ViewSnapshot,
    pub playback: PlaybackState,
    pub uplink_connected: bool,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Serialize the current view for clients
async fn build_view_json(state: &AppState) -> anyhow::Result<String> {
    let view = state.store.view(state.config.view_limit).await?;
    let update = ViewUpdate {
        kind: "view",
        view,
        playback: state.playback_state(),
        uplink_connected: state.is_uplink_connected(),
    };
    Ok(serde_json::to_string(&update)?)
}

/// Handle an individual WebSocket connection
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Subscribe before the snapshot so no update falls in between
    let mut rx = state.ws_tx.subscribe();

    match build_view_json(&state).await {
        Ok(json) => {
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        Err(e) => tracing::warn!("Initial view failed: {}", e),
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                        break;
                    }
                }
                // Slow client: the next update supersedes what it missed
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "WebSocket client lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    tracing::debug!("WebSocket client disconnected");
}

/// Broadcast the current view to all connected clients.
/// Called from the refresh loop.
pub async fn broadcast_view(state: &AppState) -> anyhow::Result<()> {
    if state.ws_tx.receiver_count() == 0 {
        return Ok(());
    }
    let json = build_view_json(state).await?;
    let _ = state.ws_tx.send(json);
    Ok(())
}
