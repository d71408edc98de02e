//! Per-turn orchestration and session lifecycle driving.

use std::sync::Arc;

use anyhow::Result;
use palaver_bus::BusPublisher;
use palaver_provider::LlmProvider;
use palaver_schema::{BusMessage, EventType, SessionEvent, SummaryPayload};
use palaver_store::SessionStore;

use crate::context::{ContextBuilder, ContextConfig};
use crate::intent;
use crate::lifecycle::{SessionArena, SessionLane};
use crate::streaming::{self, EventSink, StreamingConfig};
use crate::summarizer::Summarizer;
use crate::tools::{self, ToolDispatcher, ToolOutcome};

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub model: String,
    pub context: ContextConfig,
    pub streaming: StreamingConfig,
}

pub struct Orchestrator {
    store: Arc<SessionStore>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    arena: SessionArena,
    tools: ToolDispatcher,
    context: ContextBuilder,
    streaming: StreamingConfig,
    summarizer: Summarizer,
    bus: BusPublisher,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn LlmProvider>,
        config: OrchestratorConfig,
        bus: BusPublisher,
    ) -> Self {
        let summarizer = Summarizer::new(store.clone(), provider.clone(), config.model.clone());
        Self {
            tools: ToolDispatcher::new(store.clone()),
            context: ContextBuilder::new(config.context),
            streaming: config.streaming,
            arena: SessionArena::new(),
            model: config.model,
            summarizer,
            store,
            provider,
            bus,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// First contact for a session id: get-or-create the row (an unknown id
    /// on reconnect is just a new session, not an error) and hand back the
    /// session's lane.
    pub async fn connect(&self, session_id: &str, owner_id: &str) -> Result<Arc<SessionLane>> {
        let (record, created) = self.store.get_or_create_session(session_id, owner_id).await?;
        if created {
            tracing::info!(session_id, owner_id, "new session created");
        } else {
            tracing::info!(session_id, status = record.status.as_str(), "session reconnected");
        }

        let lane = self.arena.lane(session_id, owner_id);
        lane.mark_active();
        Ok(lane)
    }

    /// Process one inbound user message end to end: log it, classify,
    /// dispatch a tool if one applies, assemble the context, stream the
    /// reply to the sink and log the accumulated text. Failures local to
    /// the turn degrade or surface as error events; they never abort the
    /// session, so this only returns `Err` on internal invariant breakage.
    pub async fn handle_message(
        &self,
        lane: &SessionLane,
        text: &str,
        sink: &dyn EventSink,
    ) -> Result<()> {
        // One turn at a time per session.
        let _turn_guard = lane.lock_turn().await;
        let session_id = lane.session_id();

        let user_seq = match self
            .store
            .append_turn(session_id, EventType::User, text, None)
            .await
        {
            Ok(seq) => seq,
            Err(e) => {
                tracing::warn!(session_id, "failed to log user turn: {e}");
                let _ = sink
                    .emit(SessionEvent::Error {
                        message: "Your message could not be recorded. Please try again.".into(),
                    })
                    .await;
                let _ = self
                    .bus
                    .publish(BusMessage::TaskFailed {
                        session_id: session_id.to_owned(),
                        error: e.to_string(),
                    })
                    .await;
                return Ok(());
            }
        };

        let intent = intent::classify(text);
        tracing::debug!(session_id, intent = intent.as_str(), "intent classified");
        let _ = sink.emit(SessionEvent::Intent { intent }).await;
        let _ = self
            .bus
            .publish(BusMessage::MessageAccepted {
                session_id: session_id.to_owned(),
                intent,
            })
            .await;

        let tool_outcome = match tools::decide(text) {
            Some(call) => {
                let _ = sink
                    .emit(SessionEvent::Tool {
                        tool: call.name().to_owned(),
                    })
                    .await;
                let outcome = self.tools.dispatch(&call, session_id, lane.owner_id()).await;
                let _ = self
                    .bus
                    .publish(BusMessage::ToolInvoked {
                        session_id: session_id.to_owned(),
                        tool: outcome.tool().to_owned(),
                        ok: outcome.is_success(),
                    })
                    .await;

                if let ToolOutcome::Failure { tool, error } = &outcome {
                    let notice = format!("tool {tool} failed: {error}");
                    if let Err(e) = self
                        .store
                        .append_turn(session_id, EventType::System, &notice, None)
                        .await
                    {
                        tracing::warn!(session_id, "failed to log tool failure: {e}");
                    }
                }
                Some(outcome)
            }
            None => None,
        };

        let history = match self
            .store
            .list_turns(session_id, Some(self.context.history_limit()), Some(user_seq))
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(session_id, "failed to load history, continuing without: {e}");
                Vec::new()
            }
        };

        let request = self
            .context
            .build(&self.model, intent, &history, text, tool_outcome.as_ref());

        let stream = match self.provider.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(session_id, "model stream could not start: {e}");
                let _ = sink
                    .emit(SessionEvent::Error {
                        message: "The assistant is unavailable right now. Please try again."
                            .into(),
                    })
                    .await;
                let _ = self
                    .bus
                    .publish(BusMessage::TaskFailed {
                        session_id: session_id.to_owned(),
                        error: e.to_string(),
                    })
                    .await;
                return Ok(());
            }
        };

        let outcome =
            streaming::pump(stream, sink, lane.cancel_token(), &self.streaming).await;

        if !outcome.text.is_empty() {
            let metadata = serde_json::json!({
                "intent": intent.as_str(),
                "tool": tool_outcome.as_ref().map(|o| o.tool()),
                "partial": !outcome.is_clean(),
            });
            match self
                .store
                .append_turn(session_id, EventType::Ai, &outcome.text, Some(metadata))
                .await
            {
                Ok(seq) => {
                    let _ = self
                        .bus
                        .publish(BusMessage::TurnLogged {
                            session_id: session_id.to_owned(),
                            event_type: EventType::Ai,
                            seq,
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!(session_id, "failed to log ai turn: {e}");
                }
            }
        }

        if let Some(error) = outcome.error {
            let _ = self
                .bus
                .publish(BusMessage::TaskFailed {
                    session_id: session_id.to_owned(),
                    error,
                })
                .await;
        }

        Ok(())
    }

    /// Disconnect (or explicit end request): cancel any in-flight stream and
    /// run finalization exactly once, no matter how many signals arrive.
    pub async fn disconnect(&self, lane: &SessionLane) -> Result<()> {
        lane.cancel_token().cancel();

        if !lane.begin_finalize() {
            tracing::debug!(
                session_id = lane.session_id(),
                "finalization already handled, ignoring duplicate disconnect"
            );
            return Ok(());
        }

        // Wait for an in-flight turn to observe the cancellation and persist
        // its partial output before summarizing.
        let _turn_guard = lane.lock_turn().await;

        let session_id = lane.session_id();
        let summarized = match self.summarizer.finalize(session_id).await {
            Ok(summarized) => summarized,
            Err(e) => {
                tracing::warn!(session_id, "finalization failed: {e}");
                let _ = self
                    .bus
                    .publish(BusMessage::TaskFailed {
                        session_id: session_id.to_owned(),
                        error: e.to_string(),
                    })
                    .await;
                false
            }
        };

        lane.finish_finalize();
        self.arena.cleanup_finalized();
        let _ = self
            .bus
            .publish(BusMessage::SessionFinalized {
                session_id: session_id.to_owned(),
                summarized,
            })
            .await;
        Ok(())
    }

    /// Administrative pass-through: rebuild the summary for a session.
    pub async fn regenerate_summary(&self, session_id: &str) -> Result<SummaryPayload> {
        self.summarizer.regenerate(session_id).await
    }
}
