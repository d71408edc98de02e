pub mod context;
pub mod intent;
pub mod lifecycle;
pub mod orchestrator;
pub mod prompts;
pub mod streaming;
pub mod summarizer;
pub mod tools;

pub use context::{ContextBuilder, ContextConfig};
pub use lifecycle::{LifecyclePhase, SessionArena, SessionLane};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use streaming::{EventSink, StreamOutcome, StreamingConfig};
pub use summarizer::Summarizer;
pub use tools::{ToolCall, ToolDispatcher, ToolOutcome};
