//! Server-sent observability stream over the in-process bus.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures_core::Stream;
use palaver_bus::Topic;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/stream", get(event_stream))
}

async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx_accepted = state.bus.subscribe(Topic::MessageAccepted).await;
    let mut rx_tool = state.bus.subscribe(Topic::ToolInvoked).await;
    let mut rx_turn = state.bus.subscribe(Topic::TurnLogged).await;
    let mut rx_delta = state.bus.subscribe(Topic::StreamDelta).await;
    let mut rx_finalized = state.bus.subscribe(Topic::SessionFinalized).await;
    let mut rx_failed = state.bus.subscribe(Topic::TaskFailed).await;

    let stream = async_stream::stream! {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;

            while let Ok(msg) = rx_accepted.try_recv() {
                if let Ok(json) = serde_json::to_string(&msg) {
                    yield Ok(Event::default().data(json));
                }
            }
            while let Ok(msg) = rx_tool.try_recv() {
                if let Ok(json) = serde_json::to_string(&msg) {
                    yield Ok(Event::default().data(json));
                }
            }
            while let Ok(msg) = rx_turn.try_recv() {
                if let Ok(json) = serde_json::to_string(&msg) {
                    yield Ok(Event::default().data(json));
                }
            }
            while let Ok(msg) = rx_delta.try_recv() {
                if let Ok(json) = serde_json::to_string(&msg) {
                    yield Ok(Event::default().data(json));
                }
            }
            while let Ok(msg) = rx_finalized.try_recv() {
                if let Ok(json) = serde_json::to_string(&msg) {
                    yield Ok(Event::default().data(json));
                }
            }
            while let Ok(msg) = rx_failed.try_recv() {
                if let Ok(json) = serde_json::to_string(&msg) {
                    yield Ok(Event::default().data(json));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
