//! Session summarization.
//!
//! Builds a transcript from the stored turns, asks the model for a
//! structured summary, and persists the result. Malformed model output gets
//! one clarifying retry; a definitive failure still finalizes the session
//! with empty summary fields so nothing is ever left stuck in finalizing.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use palaver_provider::{ChatRequest, LlmProvider};
use palaver_schema::{EventType, SessionMetrics, Sentiment, SummaryPayload, TurnRecord};
use palaver_store::SessionStore;

const SUMMARY_MAX_TOKENS: u32 = 1024;

pub struct Summarizer {
    store: Arc<SessionStore>,
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl Summarizer {
    pub fn new(store: Arc<SessionStore>, provider: Arc<dyn LlmProvider>, model: String) -> Self {
        Self {
            store,
            provider,
            model,
        }
    }

    /// Finalize a session: write summary fields if the model cooperates,
    /// then mark the session completed either way. Returns whether a
    /// summary was produced. Only a failing status update escalates as an
    /// error.
    pub async fn finalize(&self, session_id: &str) -> Result<bool> {
        let summarized = match self.summarize(session_id).await {
            Ok((payload, metrics)) => {
                if let Err(e) = self.store.update_summary(session_id, &payload, &metrics).await {
                    tracing::warn!(session_id, "failed to persist summary: {e}");
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                tracing::warn!(session_id, "summary generation failed: {e}");
                false
            }
        };

        self.store.complete_session(session_id).await?;
        tracing::info!(session_id, summarized, "session finalized");
        Ok(summarized)
    }

    /// Regenerate summary fields for an existing (typically completed)
    /// session. Overwrites prior fields; status and end time are untouched.
    pub async fn regenerate(&self, session_id: &str) -> Result<SummaryPayload> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| anyhow!("session not found: {session_id}"))?;

        let (payload, metrics) = self.summarize(session_id).await?;
        self.store
            .update_summary(session_id, &payload, &metrics)
            .await?;
        Ok(payload)
    }

    /// Produce summary fields plus locally computed metrics for a session.
    pub async fn summarize(
        &self,
        session_id: &str,
    ) -> Result<(SummaryPayload, SessionMetrics)> {
        let turns = self.store.list_turns(session_id, None, None).await?;
        let metrics = compute_metrics(&turns);

        if metrics.total_turns == 0 {
            return Ok((
                SummaryPayload {
                    summary: "No messages in session".into(),
                    topics: vec![],
                    sentiment: Sentiment::Neutral,
                    key_outcomes: String::new(),
                },
                metrics,
            ));
        }

        let transcript = render_transcript(&turns);
        let prompt = summary_prompt(&transcript);

        let payload = match self.request_summary(&prompt).await {
            Ok(payload) => payload,
            Err(first_err) => {
                tracing::warn!(session_id, "summary attempt failed, retrying once: {first_err}");
                let retry_prompt = format!(
                    "{prompt}\n\nYour previous reply could not be parsed. Respond with ONLY \
                     the raw JSON object, no markdown fences and no commentary."
                );
                self.request_summary(&retry_prompt).await?
            }
        };

        Ok((payload, metrics))
    }

    async fn request_summary(&self, prompt: &str) -> Result<SummaryPayload> {
        let request = ChatRequest {
            model: self.model.clone(),
            system: None,
            messages: vec![palaver_provider::ChatMessage::user(prompt)],
            max_tokens: SUMMARY_MAX_TOKENS,
        };
        let response = self.provider.invoke(request).await?;
        parse_summary(&response.text)
    }
}

/// Render stored turns as one "role: text" transcript. System turns are
/// operator notices and stay out of the transcript.
pub fn render_transcript(turns: &[TurnRecord]) -> String {
    turns
        .iter()
        .filter(|t| t.event_type != EventType::System)
        .map(|t| format!("{}: {}", t.event_type.as_str(), t.message))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn compute_metrics(turns: &[TurnRecord]) -> SessionMetrics {
    let mut metrics = SessionMetrics::default();
    for turn in turns {
        match turn.event_type {
            EventType::User => {
                metrics.user_turns += 1;
                metrics.user_words += turn.message.split_whitespace().count();
            }
            EventType::Ai => {
                metrics.ai_turns += 1;
                metrics.ai_words += turn.message.split_whitespace().count();
            }
            EventType::System => continue,
        }
        metrics.total_turns += 1;
    }
    metrics
}

fn summary_prompt(transcript: &str) -> String {
    format!(
        "Analyze the following conversation and provide a professional summary.\n\n\
         Conversation:\n{transcript}\n\n\
         Create an analysis with:\n\
         1. A clear, readable summary (3-4 sentences on what was discussed and accomplished)\n\
         2. Main topics discussed (3-5 key topics as an array)\n\
         3. Overall sentiment (one of: positive, neutral, negative)\n\
         4. Key outcomes or conclusions (1-2 sentences)\n\n\
         IMPORTANT: Respond with ONLY valid JSON, no markdown and no extra text, \
         in this shape:\n\
         {{\"summary\": \"...\", \"topics\": [\"...\"], \"sentiment\": \"neutral\", \
         \"key_outcomes\": \"...\"}}"
    )
}

/// Parse the model's reply into summary fields. Tolerates a markdown code
/// fence around the JSON but nothing looser than that.
pub fn parse_summary(text: &str) -> Result<SummaryPayload> {
    let trimmed = text.trim();
    if let Ok(payload) = serde_json::from_str::<SummaryPayload>(trimmed) {
        return Ok(payload);
    }

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim);
    if let Some(inner) = unfenced {
        if let Ok(payload) = serde_json::from_str::<SummaryPayload>(inner) {
            return Ok(payload);
        }
    }

    Err(anyhow!(
        "summary reply is not the expected JSON object: {}",
        trimmed.chars().take(120).collect::<String>()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use palaver_provider::ChatResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn turn(seq: i64, event_type: EventType, message: &str) -> TurnRecord {
        TurnRecord {
            seq,
            session_id: "s-1".into(),
            event_type,
            message: message.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn transcript_renders_roles_and_skips_system() {
        let turns = vec![
            turn(1, EventType::User, "hi"),
            turn(2, EventType::Ai, "hello"),
            turn(3, EventType::System, "tool failed"),
        ];
        assert_eq!(render_transcript(&turns), "user: hi\nai: hello");
    }

    #[test]
    fn metrics_count_turns_and_words() {
        let turns = vec![
            turn(1, EventType::User, "two words"),
            turn(2, EventType::Ai, "three words here"),
            turn(3, EventType::System, "ignored"),
        ];
        let metrics = compute_metrics(&turns);
        assert_eq!(metrics.total_turns, 2);
        assert_eq!(metrics.user_turns, 1);
        assert_eq!(metrics.ai_turns, 1);
        assert_eq!(metrics.user_words, 2);
        assert_eq!(metrics.ai_words, 3);
    }

    #[test]
    fn parse_summary_accepts_raw_and_fenced_json() {
        let raw = r#"{"summary": "s", "topics": ["t"], "sentiment": "positive", "key_outcomes": "k"}"#;
        assert_eq!(parse_summary(raw).unwrap().sentiment, Sentiment::Positive);

        let fenced = format!("```json\n{raw}\n```");
        assert_eq!(parse_summary(&fenced).unwrap().summary, "s");

        assert!(parse_summary("Sure! Here is your summary: ...").is_err());
        assert!(parse_summary(r#"{"summary": "s", "sentiment": "ecstatic"}"#).is_err());
    }

    /// Deterministic provider that replies from a fixed script.
    struct ScriptedProvider {
        replies: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: replies.into_iter().map(String::from).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn invoke(&self, _request: ChatRequest) -> Result<ChatResponse> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self
                .replies
                .get(idx.min(self.replies.len().saturating_sub(1)))
                .cloned()
                .ok_or_else(|| anyhow!("no scripted reply"))?;
            Ok(ChatResponse {
                text,
                input_tokens: None,
                output_tokens: None,
                stop_reason: Some("stop".into()),
            })
        }
    }

    const GOOD_JSON: &str = r#"{"summary": "Discussed Rust basics.", "topics": ["rust"], "sentiment": "positive", "key_outcomes": "Learned ownership."}"#;

    async fn seeded(store: &SessionStore) {
        store.get_or_create_session("s-1", "u-1").await.unwrap();
        store
            .append_turn("s-1", EventType::User, "hi", None)
            .await
            .unwrap();
        store
            .append_turn("s-1", EventType::Ai, "hello", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn finalize_writes_summary_and_completes() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        seeded(&store).await;
        let summarizer = Summarizer::new(
            store.clone(),
            Arc::new(ScriptedProvider::new(vec![GOOD_JSON])),
            "test-model".into(),
        );

        let summarized = summarizer.finalize("s-1").await.unwrap();
        assert!(summarized);

        let record = store.get_session("s-1").await.unwrap().unwrap();
        assert_eq!(record.status, palaver_schema::SessionStatus::Completed);
        assert!(record.end_time.is_some());
        assert_eq!(record.summary.as_deref(), Some("Discussed Rust basics."));
        assert_eq!(record.metrics.unwrap().total_turns, 2);
    }

    #[tokio::test]
    async fn malformed_reply_retries_once_then_succeeds() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        seeded(&store).await;
        let provider = Arc::new(ScriptedProvider::new(vec!["not json at all", GOOD_JSON]));
        let summarizer = Summarizer::new(store.clone(), provider.clone(), "test-model".into());

        let (payload, _) = summarizer.summarize("s-1").await.unwrap();
        assert_eq!(payload.topics, vec!["rust"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn double_failure_finalizes_with_empty_fields() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        seeded(&store).await;
        let summarizer = Summarizer::new(
            store.clone(),
            Arc::new(ScriptedProvider::new(vec!["garbage", "still garbage"])),
            "test-model".into(),
        );

        let summarized = summarizer.finalize("s-1").await.unwrap();
        assert!(!summarized);

        let record = store.get_session("s-1").await.unwrap().unwrap();
        assert_eq!(record.status, palaver_schema::SessionStatus::Completed);
        assert!(record.end_time.is_some());
        assert!(record.summary.is_none());
    }

    #[tokio::test]
    async fn empty_session_finalizes_without_model_call() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        store.get_or_create_session("s-1", "u-1").await.unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let summarizer = Summarizer::new(store.clone(), provider.clone(), "test-model".into());

        let summarized = summarizer.finalize("s-1").await.unwrap();
        assert!(summarized);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let record = store.get_session("s-1").await.unwrap().unwrap();
        assert_eq!(record.summary.as_deref(), Some("No messages in session"));
    }

    #[tokio::test]
    async fn regenerate_is_idempotent_with_deterministic_model() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        seeded(&store).await;
        let summarizer = Summarizer::new(
            store.clone(),
            Arc::new(ScriptedProvider::new(vec![GOOD_JSON, GOOD_JSON, GOOD_JSON])),
            "test-model".into(),
        );

        summarizer.finalize("s-1").await.unwrap();
        let first = store.get_session("s-1").await.unwrap().unwrap();

        let payload = summarizer.regenerate("s-1").await.unwrap();
        let second = store.get_session("s-1").await.unwrap().unwrap();

        assert_eq!(payload.summary, "Discussed Rust basics.");
        assert_eq!(first.topics, second.topics);
        assert_eq!(first.sentiment, second.sentiment);
        assert_eq!(first.metrics, second.metrics);
        // Status and end time survive regeneration untouched.
        assert_eq!(second.status, palaver_schema::SessionStatus::Completed);
        assert_eq!(first.end_time, second.end_time);
    }

    #[tokio::test]
    async fn regenerate_unknown_session_errors() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let summarizer = Summarizer::new(
            store,
            Arc::new(ScriptedProvider::new(vec![GOOD_JSON])),
            "test-model".into(),
        );
        assert!(summarizer.regenerate("missing").await.is_err());
    }
}
