use std::sync::Arc;

use anyhow::Result;
use palaver_bus::EventBus;
use palaver_core::{ContextConfig, Orchestrator, OrchestratorConfig};
use palaver_server::config::ServerConfig;
use palaver_server::state::AppState;
use palaver_store::SessionStore;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = std::path::Path::new("logs");
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "palaver-server.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("palaver_server=info,palaver_core=info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(model = %config.model, db = %config.db_path, "starting palaver");

    let store = Arc::new(SessionStore::open(&config.db_path)?);
    let provider = palaver_provider::create_provider(&config.provider)?;
    let bus = Arc::new(EventBus::new(128));

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        provider,
        OrchestratorConfig {
            model: config.model.clone(),
            context: ContextConfig {
                history_limit: config.history_limit,
                ..ContextConfig::default()
            },
            ..Default::default()
        },
        bus.publisher(),
    ));

    let state = AppState {
        orchestrator,
        store,
        bus,
        model: config.model.clone(),
    };

    palaver_server::serve(state, &config.bind).await
}
