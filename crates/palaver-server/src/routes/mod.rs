pub mod chat;
pub mod events;
pub mod health;
pub mod sessions;

use axum::Router;

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/sessions", sessions::router())
        .nest("/events", events::router())
        .nest("/health", health::router())
}
