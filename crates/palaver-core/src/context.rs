//! Assembles the model-facing prompt for one turn.

use palaver_provider::{ChatMessage, ChatRequest};
use palaver_schema::{EventType, Intent, TurnRecord};

use crate::prompts;
use crate::tools::ToolOutcome;

#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// How many prior turns to include. Older turns are dropped outright;
    /// there is no compression pass.
    pub history_limit: usize,
    pub max_tokens: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            max_tokens: 2048,
        }
    }
}

pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn history_limit(&self) -> usize {
        self.config.history_limit
    }

    /// Build the request: intent-selected system instruction, the bounded
    /// history window (oldest to newest, store order), then the current user
    /// message with any successful tool result folded in just before it.
    pub fn build(
        &self,
        model: &str,
        intent: Intent,
        history: &[TurnRecord],
        current_text: &str,
        tool: Option<&ToolOutcome>,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len().min(self.config.history_limit) + 1);

        let window_start = history.len().saturating_sub(self.config.history_limit);
        for turn in &history[window_start..] {
            match turn.event_type {
                EventType::User => messages.push(ChatMessage::user(turn.message.clone())),
                EventType::Ai => messages.push(ChatMessage::assistant(turn.message.clone())),
                // System turns are operator notices, not dialogue.
                EventType::System => {}
            }
        }

        let current = match tool {
            Some(ToolOutcome::Success { tool, data }) => format!(
                "User query: {current_text}\n\n\
                 Data retrieved with the {tool} function:\n{}\n\n\
                 Use this data to answer the user's question conversationally. \
                 Interpret it rather than repeating it raw.",
                serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string()),
            ),
            // Failed tools degrade to a plain no-tool turn.
            _ => current_text.to_string(),
        };
        messages.push(ChatMessage::user(current));

        ChatRequest {
            model: model.to_string(),
            system: Some(prompts::instruction_for(intent).to_string()),
            messages,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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

    fn builder() -> ContextBuilder {
        ContextBuilder::new(ContextConfig::default())
    }

    #[test]
    fn system_instruction_follows_intent() {
        let req = builder().build("m", Intent::Tutorial, &[], "hi", None);
        assert!(req.system.as_deref().unwrap().contains("teacher"));

        let req = builder().build("m", Intent::CodeAssistant, &[], "hi", None);
        assert!(req.system.as_deref().unwrap().contains("programming"));
    }

    #[test]
    fn history_window_never_exceeds_limit() {
        let history: Vec<TurnRecord> = (0..50)
            .map(|i| {
                let et = if i % 2 == 0 {
                    EventType::User
                } else {
                    EventType::Ai
                };
                turn(i, et, &format!("msg {i}"))
            })
            .collect();

        let req = builder().build("m", Intent::CasualChat, &history, "now", None);
        // 20 history turns plus the current message.
        assert_eq!(req.messages.len(), 21);
        // The window keeps the most recent turns, oldest first.
        assert_eq!(req.messages[0].content, "msg 30");
        assert_eq!(req.messages[19].content, "msg 49");
        assert_eq!(req.messages[20].content, "now");
    }

    #[test]
    fn history_maps_roles_and_skips_system_turns() {
        let history = vec![
            turn(1, EventType::User, "hi"),
            turn(2, EventType::Ai, "hello"),
            turn(3, EventType::System, "tool get_session_stats failed"),
        ];
        let req = builder().build("m", Intent::CasualChat, &history, "next", None);
        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[0].role, "user");
        assert_eq!(req.messages[1].role, "assistant");
        assert_eq!(req.messages[2].content, "next");
    }

    #[test]
    fn successful_tool_result_folds_into_current_message() {
        let outcome = ToolOutcome::Success {
            tool: "get_session_stats",
            data: serde_json::json!({"total_messages": 6}),
        };
        let req = builder().build(
            "m",
            Intent::CasualChat,
            &[],
            "how many messages?",
            Some(&outcome),
        );
        let last = &req.messages.last().unwrap().content;
        assert!(last.contains("how many messages?"));
        assert!(last.contains("get_session_stats"));
        assert!(last.contains("total_messages"));
    }

    #[test]
    fn failed_tool_result_is_treated_as_absent() {
        let outcome = ToolOutcome::Failure {
            tool: "get_session_stats",
            error: "store unreachable".into(),
        };
        let req = builder().build("m", Intent::CasualChat, &[], "hi", Some(&outcome));
        assert_eq!(req.messages.last().unwrap().content, "hi");
    }

    #[test]
    fn configurable_window_size() {
        let builder = ContextBuilder::new(ContextConfig {
            history_limit: 2,
            max_tokens: 512,
        });
        let history = vec![
            turn(1, EventType::User, "a"),
            turn(2, EventType::Ai, "b"),
            turn(3, EventType::User, "c"),
        ];
        let req = builder.build("m", Intent::CasualChat, &history, "d", None);
        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[0].content, "b");
        assert_eq!(req.max_tokens, 512);
    }
}
