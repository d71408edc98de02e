use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use palaver_schema::{
    EventType, SessionMetrics, SessionRecord, SessionStatus, Sentiment, SummaryPayload, TurnRecord,
};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};
use tokio::task;

use crate::migrations::run_migrations;

/// SQLite-backed store adapter for sessions and their turn logs.
///
/// Safe to share across session tasks: every call serializes on the inner
/// connection and runs on the blocking pool. Per-session turn ordering comes
/// from the `turns` rowid (`seq`), assigned monotonically on insert.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Get the session row for `session_id`, creating it (status=active) if
    /// absent. Uses a unique-constraint upsert so two connections racing the
    /// same new id resolve to the first writer's row. Returns the row plus
    /// whether this call created it.
    pub async fn get_or_create_session(
        &self,
        session_id: &str,
        owner_id: &str,
    ) -> Result<(SessionRecord, bool)> {
        let db = Arc::clone(&self.db);
        let session_id = session_id.to_owned();
        let owner_id = owner_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let created = conn.execute(
                r#"
                INSERT INTO sessions (session_id, owner_id, status, start_time)
                VALUES (?1, ?2, 'active', ?3)
                ON CONFLICT(session_id) DO NOTHING
                "#,
                params![session_id, owner_id, Utc::now().to_rfc3339()],
            )? > 0;

            let record = query_session(&conn, &session_id)?
                .ok_or_else(|| anyhow!("session row missing after upsert: {session_id}"))?;
            Ok::<(SessionRecord, bool), anyhow::Error>((record, created))
        })
        .await?
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let db = Arc::clone(&self.db);
        let session_id = session_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            query_session(&conn, &session_id)
        })
        .await?
    }

    /// Append one immutable turn. Returns the store-assigned sequence number.
    pub async fn append_turn(
        &self,
        session_id: &str,
        event_type: EventType,
        message: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<i64> {
        let db = Arc::clone(&self.db);
        let session_id = session_id.to_owned();
        let message = message.to_owned();
        task::spawn_blocking(move || {
            let metadata = metadata.map(|m| m.to_string());
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO turns (session_id, event_type, message, metadata, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    session_id,
                    event_type.as_str(),
                    message,
                    metadata,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok::<i64, anyhow::Error>(conn.last_insert_rowid())
        })
        .await?
    }

    /// List turns for a session ordered oldest-to-newest by sequence.
    ///
    /// With `limit`, only the most recent `limit` turns are returned (still
    /// ascending). `before_seq` restricts the window to turns inserted before
    /// the given sequence, which lets the context builder exclude the turn it
    /// just logged.
    pub async fn list_turns(
        &self,
        session_id: &str,
        limit: Option<usize>,
        before_seq: Option<i64>,
    ) -> Result<Vec<TurnRecord>> {
        let db = Arc::clone(&self.db);
        let session_id = session_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let ceiling = before_seq.unwrap_or(i64::MAX);
            let take = limit.map(|l| l as i64).unwrap_or(-1);
            let mut stmt = conn.prepare(
                r#"
                SELECT seq, session_id, event_type, message, metadata, created_at
                FROM (
                    SELECT * FROM turns
                    WHERE session_id = ?1 AND seq < ?2
                    ORDER BY seq DESC
                    LIMIT ?3
                )
                ORDER BY seq ASC
                "#,
            )?;
            let rows = stmt.query_map(params![session_id, ceiling, take], row_to_turn)?;
            let mut turns = Vec::new();
            for row in rows {
                turns.push(row?);
            }
            Ok::<Vec<TurnRecord>, anyhow::Error>(turns)
        })
        .await?
    }

    /// Mark a session completed and stamp its end time. The status change is
    /// monotonic and `end_time` is only written once (`COALESCE` keeps the
    /// first value on repeat calls).
    pub async fn complete_session(&self, session_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let session_id = session_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                UPDATE sessions
                SET status = 'completed',
                    end_time = COALESCE(end_time, ?2)
                WHERE session_id = ?1
                "#,
                params![session_id, Utc::now().to_rfc3339()],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await?
    }

    /// Write (or overwrite) summary fields. Does not touch status/end_time,
    /// so regeneration on a completed session is safe to repeat.
    pub async fn update_summary(
        &self,
        session_id: &str,
        payload: &SummaryPayload,
        metrics: &SessionMetrics,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let session_id = session_id.to_owned();
        let payload = payload.clone();
        let metrics = metrics.clone();
        task::spawn_blocking(move || {
            let topics = serde_json::to_string(&payload.topics)?;
            let metrics = serde_json::to_string(&metrics)?;
            let sentiment = serde_json::to_value(payload.sentiment)?
                .as_str()
                .map(|s| s.to_owned());
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                UPDATE sessions
                SET summary = ?2, topics = ?3, sentiment = ?4, metrics = ?5, key_outcomes = ?6
                WHERE session_id = ?1
                "#,
                params![
                    session_id,
                    payload.summary,
                    topics,
                    sentiment,
                    metrics,
                    payload.key_outcomes,
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await?
    }

    /// Record a 1-5 rating. A second call overwrites both the rating and its
    /// timestamp. Returns false if the session does not exist.
    pub async fn update_rating(&self, session_id: &str, rating: u8) -> Result<bool> {
        if !(1..=5).contains(&rating) {
            bail!("rating must be between 1 and 5, got {rating}");
        }
        let db = Arc::clone(&self.db);
        let session_id = session_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let updated = conn.execute(
                "UPDATE sessions SET user_rating = ?2, rated_at = ?3 WHERE session_id = ?1",
                params![session_id, rating as i64, Utc::now().to_rfc3339()],
            )?;
            Ok::<bool, anyhow::Error>(updated > 0)
        })
        .await?
    }

    /// List a user's sessions, most recently started first.
    pub async fn list_sessions(&self, owner_id: &str, limit: usize) -> Result<Vec<SessionRecord>> {
        let db = Arc::clone(&self.db);
        let owner_id = owner_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT session_id, owner_id, status, start_time, end_time, summary,
                       topics, sentiment, metrics, key_outcomes, user_rating, rated_at
                FROM sessions
                WHERE owner_id = ?1
                ORDER BY start_time DESC
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![owner_id, limit as i64], row_to_session)?;
            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row?);
            }
            Ok::<Vec<SessionRecord>, anyhow::Error>(sessions)
        })
        .await?
    }

    /// Cheap liveness probe for the health endpoint.
    pub async fn health_check(&self) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok::<(), anyhow::Error>(())
        })
        .await?
    }
}

fn query_session(conn: &Connection, session_id: &str) -> Result<Option<SessionRecord>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT session_id, owner_id, status, start_time, end_time, summary,
               topics, sentiment, metrics, key_outcomes, user_rating, rated_at
        FROM sessions
        WHERE session_id = ?1
        LIMIT 1
        "#,
    )?;
    let mut rows = stmt.query(params![session_id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(row_to_session(row)?));
    }
    Ok(None)
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    let status_raw: String = row.get(2)?;
    let start_raw: String = row.get(3)?;
    let end_raw: Option<String> = row.get(4)?;
    let topics_raw: Option<String> = row.get(6)?;
    let sentiment_raw: Option<String> = row.get(7)?;
    let metrics_raw: Option<String> = row.get(8)?;
    let rating_raw: Option<i64> = row.get(10)?;
    let rated_at_raw: Option<String> = row.get(11)?;

    Ok(SessionRecord {
        session_id: row.get(0)?,
        owner_id: row.get(1)?,
        status: SessionStatus::parse(&status_raw).unwrap_or(SessionStatus::Active),
        start_time: parse_datetime_sql(&start_raw)?,
        end_time: end_raw.as_deref().map(parse_datetime_sql).transpose()?,
        summary: row.get(5)?,
        topics: topics_raw
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_default(),
        sentiment: sentiment_raw.as_deref().and_then(Sentiment::parse),
        metrics: metrics_raw.and_then(|m| serde_json::from_str(&m).ok()),
        key_outcomes: row.get(9)?,
        user_rating: rating_raw.map(|r| r as u8),
        rated_at: rated_at_raw
            .as_deref()
            .map(parse_datetime_sql)
            .transpose()?,
    })
}

fn row_to_turn(row: &Row<'_>) -> rusqlite::Result<TurnRecord> {
    let event_raw: String = row.get(2)?;
    let metadata_raw: Option<String> = row.get(4)?;
    let created_raw: String = row.get(5)?;

    Ok(TurnRecord {
        seq: row.get(0)?,
        session_id: row.get(1)?,
        event_type: EventType::parse(&event_raw).unwrap_or(EventType::System),
        message: row.get(3)?,
        metadata: metadata_raw.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: parse_datetime_sql(&created_raw)?,
    })
}

fn parse_datetime_sql(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
