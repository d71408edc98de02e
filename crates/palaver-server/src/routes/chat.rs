//! The live conversation channel.
//!
//! Inbound frames are raw user text; outbound frames are JSON-encoded
//! `SessionEvent`s. The reader task keeps watching the socket while a reply
//! is still streaming, so a disconnect cancels the session lane's token
//! promptly, the in-flight stream stops, and finalization runs exactly once.

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use palaver_core::EventSink;
use palaver_schema::SessionEvent;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct ChatQuery {
    pub owner: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/{session_id}", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(query): Query<ChatQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let owner = query.owner.unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, owner, state))
}

/// Forwards session events into the socket writer task.
struct ChannelSink {
    tx: mpsc::Sender<SessionEvent>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: SessionEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("transport channel closed"))
    }
}

async fn handle_socket(mut socket: WebSocket, session_id: String, owner: String, state: AppState) {
    let trace_id = uuid::Uuid::new_v4();
    let lane = match state.orchestrator.connect(&session_id, &owner).await {
        Ok(lane) => lane,
        Err(e) => {
            tracing::error!(%trace_id, %session_id, "could not initialize session: {e}");
            let notice = SessionEvent::Error {
                message: "Could not initialize the session. Please try again.".into(),
            };
            if let Ok(json) = serde_json::to_string(&notice) {
                let _ = socket.send(Message::Text(json.into())).await;
            }
            let _ = socket.close().await;
            return;
        }
    };

    tracing::info!(%trace_id, %session_id, %owner, "websocket connected");
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(64);
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader task: queues inbound text for sequential turn processing and
    // cancels the lane the moment the socket goes away.
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<String>(16);
    let reader_lane = lane.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_rx.next().await {
            match frame {
                Message::Text(text) => {
                    if inbound_tx.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        reader_lane.cancel_token().cancel();
        // Dropping the sender ends the turn loop below.
    });

    let sink = ChannelSink { tx: event_tx };
    while let Some(text) = inbound_rx.recv().await {
        if text.trim().is_empty() {
            continue;
        }
        if let Err(e) = state.orchestrator.handle_message(&lane, &text, &sink).await {
            tracing::error!(%trace_id, %session_id, "turn processing failed: {e}");
        }
    }

    tracing::info!(%trace_id, %session_id, "websocket disconnected, finalizing");
    if let Err(e) = state.orchestrator.disconnect(&lane).await {
        tracing::warn!(%trace_id, %session_id, "finalization on disconnect failed: {e}");
    }

    drop(sink);
    let _ = writer.await;
    reader.abort();
}
