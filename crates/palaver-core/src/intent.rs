//! Keyword-rule intent classification.
//!
//! Rules are an explicit ordered table rather than scattered conditionals so
//! priority and fallback stay auditable: technical support outranks code
//! assistance outranks tutorials; anything else is casual chat.

use palaver_schema::Intent;

const TECHNICAL_SUPPORT_TRIGGERS: &[&str] = &[
    "error",
    "bug",
    "not working",
    "broken",
    "issue",
    "problem",
    "fix",
    "help",
    "troubleshoot",
    "debug",
    "doesn't work",
    "failing",
];

const CODE_ASSISTANT_TRIGGERS: &[&str] = &[
    "code",
    "function",
    "python",
    "javascript",
    "programming",
    "algorithm",
    "syntax",
    "class",
    "variable",
    "loop",
    "api",
    "write a",
    "create a function",
    "how to code",
];

const TUTORIAL_TRIGGERS: &[&str] = &[
    "how to",
    "teach me",
    "explain",
    "what is",
    "tutorial",
    "learn",
    "understand",
    "show me how",
    "step by step",
    "can you explain",
    "help me understand",
];

const RULES: &[(Intent, &[&str])] = &[
    (Intent::TechnicalSupport, TECHNICAL_SUPPORT_TRIGGERS),
    (Intent::CodeAssistant, CODE_ASSISTANT_TRIGGERS),
    (Intent::Tutorial, TUTORIAL_TRIGGERS),
];

/// Classify a user message. Pure function of the text: the first rule whose
/// any trigger substring appears in the lowercased message wins, and an
/// unmatched message falls back to casual chat — never an error.
pub fn classify(message: &str) -> Intent {
    let lowered = message.to_lowercase();
    for (intent, triggers) in RULES {
        if triggers.iter().any(|t| lowered.contains(t)) {
            return *intent;
        }
    }
    Intent::CasualChat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_messages_map_to_expected_intents() {
        assert_eq!(classify("My code throws an error"), Intent::TechnicalSupport);
        assert_eq!(classify("How do I write a function?"), Intent::CodeAssistant);
        assert_eq!(classify("Explain how loops work"), Intent::Tutorial);
        assert_eq!(classify("Hello!"), Intent::CasualChat);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify("MY APP IS BROKEN"), Intent::TechnicalSupport);
        assert_eq!(classify("TEACH ME rust"), Intent::Tutorial);
    }

    #[test]
    fn technical_support_wins_over_later_rules() {
        // "error" (support) and "python" (code) both match; priority decides.
        assert_eq!(
            classify("I get an error in my python script"),
            Intent::TechnicalSupport
        );
        // "explain" (tutorial) loses to "function" (code).
        assert_eq!(
            classify("explain this function to me"),
            Intent::CodeAssistant
        );
    }

    #[test]
    fn trigger_matches_inside_surrounding_text() {
        assert_eq!(
            classify("so, the thing is... my deploy keeps failing badly"),
            Intent::TechnicalSupport
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let msg = "help me understand this api";
        let first = classify(msg);
        for _ in 0..10 {
            assert_eq!(classify(msg), first);
        }
    }

    #[test]
    fn empty_message_is_casual_chat() {
        assert_eq!(classify(""), Intent::CasualChat);
    }
}
