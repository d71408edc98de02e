use std::sync::Arc;

use palaver_bus::EventBus;
use palaver_core::Orchestrator;
use palaver_store::SessionStore;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<SessionStore>,
    /// Event bus feeding the SSE observability stream.
    pub bus: Arc<EventBus>,
    /// Model identifier reported by the health probe.
    pub model: String,
}
