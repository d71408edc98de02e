use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a stored session. Transitions only ever go
/// `Active` -> `Completed`; nothing moves a session back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Kind of a logged turn within a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    User,
    Ai,
    System,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
            Self::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "ai" => Some(Self::Ai),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Coarse category of a user request, used to select the assistant's
/// behavioral framing. Derived per message, never persisted as its own row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    TechnicalSupport,
    CodeAssistant,
    Tutorial,
    CasualChat,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TechnicalSupport => "technical_support",
            Self::CodeAssistant => "code_assistant",
            Self::Tutorial => "tutorial",
            Self::CasualChat => "casual_chat",
        }
    }
}

/// Overall sentiment label produced by the summarizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "positive" => Some(Self::Positive),
            "neutral" => Some(Self::Neutral),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }
}

/// Turn counts and word counts computed from the stored transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMetrics {
    pub total_turns: usize,
    pub user_turns: usize,
    pub ai_turns: usize,
    pub user_words: usize,
    pub ai_words: usize,
}

/// One stored session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub owner_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub sentiment: Option<Sentiment>,
    pub metrics: Option<SessionMetrics>,
    pub key_outcomes: Option<String>,
    pub user_rating: Option<u8>,
    pub rated_at: Option<DateTime<Utc>>,
}

/// One immutable logged turn. `seq` is assigned by the store on insert and
/// is strictly increasing, so ordering within a session never depends on the
/// orchestrator's clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub seq: i64,
    pub session_id: String,
    pub event_type: EventType,
    pub message: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Structured summary fields parsed from the model's reply. Metrics are
/// computed locally and attached separately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryPayload {
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub sentiment: Sentiment,
    #[serde(default)]
    pub key_outcomes: String,
}

/// Events emitted to the client over the live channel. Serialized as tagged
/// JSON text frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Which behavioral mode the next reply uses.
    Intent { intent: Intent },
    /// A data-lookup tool is running before the reply.
    Tool { tool: String },
    /// One incremental chunk of the reply.
    Delta { text: String },
    /// The reply stream finished normally.
    Done,
    /// Terminal notice for this turn; the session stays usable.
    Error { message: String },
}

/// Observability messages fanned out on the in-process bus and re-emitted on
/// the server's SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusMessage {
    MessageAccepted {
        session_id: String,
        intent: Intent,
    },
    ToolInvoked {
        session_id: String,
        tool: String,
        ok: bool,
    },
    TurnLogged {
        session_id: String,
        event_type: EventType,
        seq: i64,
    },
    StreamDelta {
        session_id: String,
        delta: String,
        is_final: bool,
    },
    SessionFinalized {
        session_id: String,
        summarized: bool,
    },
    TaskFailed {
        session_id: String,
        error: String,
    },
}
