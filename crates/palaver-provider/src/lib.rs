pub mod openai;
pub mod types;

use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::iter as stream_iter;

pub use openai::{custom, groq, ollama, openai, OpenAiProvider};
pub use types::*;

/// The model collaborator seam. `stream` drives the incremental reply path;
/// `invoke` serves single-shot requests (the summarizer).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn invoke(&self, request: ChatRequest) -> Result<ChatResponse>;

    async fn stream(
        &self,
        _request: ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>> {
        anyhow::bail!("streaming not supported by this provider")
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// Provider Configuration
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Groq,
    OpenAI,
    Ollama,
    /// Any OpenAI-compatible endpoint
    Custom,
    /// Deterministic in-process stub (tests, offline development)
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            api_key: None,
            base_url: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider_type {
        ProviderType::Groq => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("groq requires api_key"))?;
            match config.base_url.as_deref() {
                Some(base) => Arc::new(custom(key.clone(), base)),
                None => Arc::new(groq(key.clone())),
            }
        }
        ProviderType::OpenAI => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("openai requires api_key"))?;
            match config.base_url.as_deref() {
                Some(base) => Arc::new(custom(key.clone(), base)),
                None => Arc::new(openai(key.clone())),
            }
        }
        ProviderType::Ollama => {
            let base = config
                .base_url
                .as_deref()
                .unwrap_or("http://localhost:11434/v1");
            Arc::new(ollama(base))
        }
        ProviderType::Custom => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("custom provider requires api_key"))?;
            let base = config
                .base_url
                .as_ref()
                .ok_or_else(|| anyhow!("custom provider requires base_url"))?;
            Arc::new(custom(key.clone(), base.clone()))
        }
        ProviderType::Stub => Arc::new(StubProvider),
    };
    tracing::info!("configured model provider: {:?}", config.provider_type);
    Ok(provider)
}

// ============================================================
// Stub provider (deterministic model stand-in)
// ============================================================

pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn invoke(&self, request: ChatRequest) -> Result<ChatResponse> {
        let user_text = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ChatResponse {
            text: format!("[stub:{}] {} [finish]", request.model, user_text),
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("stop".into()),
        })
    }

    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>> {
        let user_text = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let full_text = format!("[stub:stream:{}] {}", request.model, user_text);
        let mut chunks: Vec<Result<StreamChunk>> = full_text
            .split_whitespace()
            .map(|word| {
                Ok(StreamChunk {
                    delta: format!("{word} "),
                    is_final: false,
                    stop_reason: None,
                })
            })
            .collect();

        chunks.push(Ok(StreamChunk {
            delta: String::new(),
            is_final: true,
            stop_reason: Some("stop".into()),
        }));

        Ok(Box::pin(stream_iter(chunks)))
    }
}
