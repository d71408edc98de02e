use anyhow::Result;
use palaver_provider::{ProviderConfig, ProviderType};

/// Environment-driven server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub db_path: String,
    pub model: String,
    pub history_limit: usize,
    pub provider: ProviderConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let bind = std::env::var("PALAVER_BIND").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
        let db_path =
            std::env::var("PALAVER_DB").unwrap_or_else(|_| "palaver.db".to_string());
        let model = std::env::var("PALAVER_MODEL")
            .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string());
        let history_limit = std::env::var("PALAVER_HISTORY_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);

        let provider = if let Ok(key) = std::env::var("GROQ_API_KEY") {
            let mut config = ProviderConfig::new(ProviderType::Groq).with_api_key(key);
            if let Ok(base) = std::env::var("PALAVER_BASE_URL") {
                config = config.with_base_url(base);
            }
            config
        } else if let (Ok(key), Ok(base)) = (
            std::env::var("PALAVER_API_KEY"),
            std::env::var("PALAVER_BASE_URL"),
        ) {
            ProviderConfig::new(ProviderType::Custom)
                .with_api_key(key)
                .with_base_url(base)
        } else {
            tracing::warn!("no model API key configured, falling back to the stub provider");
            ProviderConfig::new(ProviderType::Stub)
        };

        Ok(Self {
            bind,
            db_path,
            model,
            history_limit,
            provider,
        })
    }
}
