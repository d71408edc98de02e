//! Administrative session routes: thin pass-throughs to the store adapter
//! and the summarizer, no business logic of their own.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use palaver_schema::SessionRecord;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/{id}/summary", get(get_summary))
        .route("/{id}/rate", post(rate_session))
        .route("/{id}/regenerate", post(regenerate_summary))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub owner: Option<String>,
}

#[derive(Serialize)]
pub struct SessionListing {
    pub session_id: String,
    pub status: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub summary: Option<String>,
    pub topics: Vec<String>,
    pub sentiment: Option<String>,
    pub message_count: usize,
}

fn listing(record: &SessionRecord) -> SessionListing {
    SessionListing {
        session_id: record.session_id.clone(),
        status: record.status.as_str().to_string(),
        start_time: record.start_time.to_rfc3339(),
        end_time: record.end_time.map(|t| t.to_rfc3339()),
        summary: record
            .summary
            .as_deref()
            .map(|s| s.chars().take(100).collect()),
        topics: record.topics.clone(),
        sentiment: record
            .sentiment
            .and_then(|s| serde_json::to_value(s).ok())
            .and_then(|v| v.as_str().map(str::to_owned)),
        message_count: record.metrics.as_ref().map(|m| m.total_turns).unwrap_or(0),
    }
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let owner = query.owner.unwrap_or_else(|| "anonymous".to_string());
    let sessions = state
        .store
        .list_sessions(&owner, 50)
        .await
        .map_err(internal_error)?;
    let listings: Vec<SessionListing> = sessions.iter().map(listing).collect();
    Ok(Json(serde_json::json!({
        "count": listings.len(),
        "sessions": listings,
    })))
}

async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let record = state
        .store
        .get_session(&id)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(serde_json::json!({
        "session_id": record.session_id,
        "status": record.status.as_str(),
        "start_time": record.start_time.to_rfc3339(),
        "end_time": record.end_time.map(|t| t.to_rfc3339()),
        "summary": record.summary,
        "topics": record.topics,
        "sentiment": record.sentiment,
        "metrics": record.metrics,
        "key_outcomes": record.key_outcomes,
        "user_rating": record.user_rating,
    })))
}

#[derive(Deserialize)]
pub struct RateBody {
    pub rating: u8,
}

async fn rate_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RateBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !(1..=5).contains(&body.rating) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let updated = state
        .store
        .update_rating(&id, body.rating)
        .await
        .map_err(internal_error)?;
    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(serde_json::json!({
        "success": true,
        "session_id": id,
        "rating": body.rating,
    })))
}

async fn regenerate_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    // Existence check up front so a missing session is a 404, not a model
    // round-trip.
    state
        .store
        .get_session(&id)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let payload = state
        .orchestrator
        .regenerate_summary(&id)
        .await
        .map_err(internal_error)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "session_id": id,
        "summary": payload,
    })))
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    tracing::error!("session route failed: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}
