//! Tool decision and execution.
//!
//! Tools are predefined read operations against the store that can run before
//! the model answers. The decision step mirrors the intent classifier: an
//! ordered table of trigger phrases, first match wins, at most one tool per
//! turn. Execution never raises past this boundary — a failed tool degrades
//! the turn to a no-tool context.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use palaver_schema::EventType;
use palaver_store::SessionStore;

const STATS_TRIGGERS: &[&str] = &[
    "how many messages",
    "message count",
    "how long",
    "duration",
    "session stats",
    "my activity",
    "how many times",
];

const SEARCH_TRIGGERS: &[&str] = &[
    "did i mention",
    "what did we discuss",
    "did we talk about",
    "search for",
    "find in history",
    "previous conversation",
];

const LIST_TRIGGERS: &[&str] = &[
    "my previous chats",
    "chat history",
    "all sessions",
    "past conversations",
    "show my sessions",
];

/// A matched tool with its extracted parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    SessionStats,
    SearchHistory { keyword: String },
    ListSessions,
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStats => "get_session_stats",
            Self::SearchHistory { .. } => "search_chat_history",
            Self::ListSessions => "get_all_sessions",
        }
    }
}

/// Decide whether a tool applies to this message. Deterministic: the same
/// text always yields the same decision.
pub fn decide(message: &str) -> Option<ToolCall> {
    let lowered = message.to_lowercase();

    if STATS_TRIGGERS.iter().any(|t| lowered.contains(t)) {
        return Some(ToolCall::SessionStats);
    }
    if SEARCH_TRIGGERS.iter().any(|t| lowered.contains(t)) {
        return Some(ToolCall::SearchHistory {
            keyword: extract_search_keyword(message),
        });
    }
    if LIST_TRIGGERS.iter().any(|t| lowered.contains(t)) {
        return Some(ToolCall::ListSessions);
    }
    None
}

/// Pull a search keyword out of phrases like "what did we discuss about X"
/// or "did I mention Y". Falls back to the message's last word.
fn extract_search_keyword(message: &str) -> String {
    let lowered = message.to_lowercase();
    const PATTERNS: &[&str] = &[
        "about ",
        "mention ",
        "discuss ",
        "talk about ",
        "said about ",
        "for ",
        "regarding ",
    ];

    for pattern in PATTERNS {
        if let Some((_, rest)) = lowered.split_once(pattern) {
            if let Some(word) = rest.split_whitespace().next() {
                return word.trim_matches(&['?', ',', '.', '!'][..]).to_string();
            }
        }
    }

    lowered
        .split_whitespace()
        .last()
        .map(|w| w.trim_matches(&['?', ',', '.', '!'][..]).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// What a tool run produced. Failures carry an error string instead of
/// propagating, so a broken tool never aborts the turn.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Success {
        tool: &'static str,
        data: serde_json::Value,
    },
    Failure {
        tool: &'static str,
        error: String,
    },
}

impl ToolOutcome {
    pub fn tool(&self) -> &'static str {
        match self {
            Self::Success { tool, .. } | Self::Failure { tool, .. } => tool,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Executes matched tools against the store adapter. The current session id
/// is implicit for session-scoped tools.
#[derive(Clone)]
pub struct ToolDispatcher {
    store: Arc<SessionStore>,
}

impl ToolDispatcher {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    pub async fn dispatch(
        &self,
        call: &ToolCall,
        session_id: &str,
        owner_id: &str,
    ) -> ToolOutcome {
        let tool = call.name();
        let result = match call {
            ToolCall::SessionStats => self.session_stats(session_id).await,
            ToolCall::SearchHistory { keyword } => self.search_history(session_id, keyword).await,
            ToolCall::ListSessions => self.list_sessions(owner_id).await,
        };
        match result {
            Ok(data) => ToolOutcome::Success { tool, data },
            Err(e) => {
                tracing::warn!(tool, session_id, "tool execution failed: {e}");
                ToolOutcome::Failure {
                    tool,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn session_stats(&self, session_id: &str) -> Result<serde_json::Value> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("session not found: {session_id}"))?;
        let turns = self.store.list_turns(session_id, None, None).await?;

        let user_messages = turns
            .iter()
            .filter(|t| t.event_type == EventType::User)
            .count();
        let ai_messages = turns
            .iter()
            .filter(|t| t.event_type == EventType::Ai)
            .count();
        let duration_minutes =
            (Utc::now() - session.start_time).num_seconds().max(0) as f64 / 60.0;

        Ok(serde_json::json!({
            "session_id": session_id,
            "start_time": session.start_time.to_rfc3339(),
            "duration_minutes": (duration_minutes * 100.0).round() / 100.0,
            "total_messages": user_messages + ai_messages,
            "user_messages": user_messages,
            "ai_messages": ai_messages,
            "status": session.status.as_str(),
        }))
    }

    async fn search_history(&self, session_id: &str, keyword: &str) -> Result<serde_json::Value> {
        let turns = self.store.list_turns(session_id, None, None).await?;
        if turns.is_empty() {
            return Ok(serde_json::json!({
                "found": false,
                "message": "No messages in this session yet",
            }));
        }

        let needle = keyword.to_lowercase();
        let matching: Vec<serde_json::Value> = turns
            .iter()
            .filter(|t| t.message.to_lowercase().contains(&needle))
            .map(|t| {
                serde_json::json!({
                    "type": t.event_type.as_str(),
                    "message": t.message,
                    "seq": t.seq,
                })
            })
            .collect();

        if matching.is_empty() {
            return Ok(serde_json::json!({
                "found": false,
                "keyword": keyword,
                "message": format!("No messages found containing '{keyword}'"),
            }));
        }

        Ok(serde_json::json!({
            "found": true,
            "keyword": keyword,
            "matches": matching.len(),
            "messages": matching.into_iter().take(5).collect::<Vec<_>>(),
        }))
    }

    async fn list_sessions(&self, owner_id: &str) -> Result<serde_json::Value> {
        let sessions = self.store.list_sessions(owner_id, 10).await?;
        if sessions.is_empty() {
            return Ok(serde_json::json!({"message": "No previous sessions found"}));
        }

        let listing: Vec<serde_json::Value> = sessions
            .iter()
            .map(|s| {
                let preview = s
                    .summary
                    .as_deref()
                    .map(|text| text.chars().take(100).collect::<String>())
                    .unwrap_or_else(|| "No summary available".to_string());
                serde_json::json!({
                    "session_id": s.session_id,
                    "start_time": s.start_time.to_rfc3339(),
                    "status": s.status.as_str(),
                    "summary": preview,
                })
            })
            .collect();

        Ok(serde_json::json!({
            "total_sessions": listing.len(),
            "sessions": listing,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_schema::{Sentiment, SessionMetrics, SummaryPayload};

    #[test]
    fn decide_matches_stats_phrases() {
        let call = decide("How many messages have I sent?").unwrap();
        assert_eq!(call, ToolCall::SessionStats);
        assert_eq!(call.name(), "get_session_stats");
    }

    #[test]
    fn decide_matches_search_with_keyword() {
        match decide("What did we discuss about rust?").unwrap() {
            ToolCall::SearchHistory { keyword } => assert_eq!(keyword, "rust"),
            other => panic!("expected SearchHistory, got {other:?}"),
        }
        match decide("did I mention lifetimes earlier").unwrap() {
            ToolCall::SearchHistory { keyword } => assert_eq!(keyword, "lifetimes"),
            other => panic!("expected SearchHistory, got {other:?}"),
        }
    }

    #[test]
    fn decide_matches_listing_phrases() {
        assert_eq!(decide("show my sessions please"), Some(ToolCall::ListSessions));
    }

    #[test]
    fn decide_first_match_wins() {
        // Stats phrase and listing phrase in one message: stats is checked first.
        let call = decide("how many messages are in my chat history?").unwrap();
        assert_eq!(call, ToolCall::SessionStats);
    }

    #[test]
    fn decide_none_for_plain_chat() {
        assert_eq!(decide("hello there"), None);
    }

    #[test]
    fn decide_is_deterministic() {
        let msg = "search for borrowing";
        assert_eq!(decide(msg), decide(msg));
    }

    #[test]
    fn keyword_extraction_falls_back_to_last_word() {
        assert_eq!(extract_search_keyword("find in history ownership?"), "ownership");
    }

    async fn seeded_store() -> Arc<SessionStore> {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        store.get_or_create_session("s-1", "u-1").await.unwrap();
        for i in 0..3 {
            store
                .append_turn("s-1", EventType::User, &format!("user msg {i} about rust"), None)
                .await
                .unwrap();
            store
                .append_turn("s-1", EventType::Ai, &format!("ai reply {i}"), None)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn session_stats_counts_turns() {
        let store = seeded_store().await;
        let dispatcher = ToolDispatcher::new(store);
        let outcome = dispatcher
            .dispatch(&ToolCall::SessionStats, "s-1", "u-1")
            .await;
        match outcome {
            ToolOutcome::Success { data, .. } => {
                assert_eq!(data["user_messages"], 3);
                assert_eq!(data["ai_messages"], 3);
                assert_eq!(data["total_messages"], 6);
                assert_eq!(data["status"], "active");
            }
            ToolOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn search_history_finds_keyword_case_insensitive() {
        let store = seeded_store().await;
        let dispatcher = ToolDispatcher::new(store);
        let outcome = dispatcher
            .dispatch(
                &ToolCall::SearchHistory {
                    keyword: "RUST".into(),
                },
                "s-1",
                "u-1",
            )
            .await;
        match outcome {
            ToolOutcome::Success { data, .. } => {
                assert_eq!(data["found"], true);
                assert_eq!(data["matches"], 3);
            }
            ToolOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn search_history_reports_no_match() {
        let store = seeded_store().await;
        let dispatcher = ToolDispatcher::new(store);
        let outcome = dispatcher
            .dispatch(
                &ToolCall::SearchHistory {
                    keyword: "kubernetes".into(),
                },
                "s-1",
                "u-1",
            )
            .await;
        match outcome {
            ToolOutcome::Success { data, .. } => assert_eq!(data["found"], false),
            ToolOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn list_sessions_previews_summary() {
        let store = seeded_store().await;
        store
            .update_summary(
                "s-1",
                &SummaryPayload {
                    summary: "x".repeat(300),
                    topics: vec![],
                    sentiment: Sentiment::Neutral,
                    key_outcomes: String::new(),
                },
                &SessionMetrics::default(),
            )
            .await
            .unwrap();
        let dispatcher = ToolDispatcher::new(store);
        let outcome = dispatcher
            .dispatch(&ToolCall::ListSessions, "s-1", "u-1")
            .await;
        match outcome {
            ToolOutcome::Success { data, .. } => {
                assert_eq!(data["total_sessions"], 1);
                let preview = data["sessions"][0]["summary"].as_str().unwrap();
                assert_eq!(preview.len(), 100);
            }
            ToolOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn unknown_session_degrades_to_failure() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let dispatcher = ToolDispatcher::new(store);
        let outcome = dispatcher
            .dispatch(&ToolCall::SessionStats, "missing", "u-1")
            .await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.tool(), "get_session_stats");
    }
}
