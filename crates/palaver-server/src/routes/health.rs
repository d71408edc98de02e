use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = match state.store.health_check().await {
        Ok(()) => "healthy".to_string(),
        Err(e) => format!("unhealthy: {e}"),
    };

    Json(serde_json::json!({
        "status": "running",
        "database": database,
        "model": state.model,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
