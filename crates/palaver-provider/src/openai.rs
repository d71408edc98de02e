//! OpenAI-compatible chat completions provider.
//!
//! Groq, OpenAI, Ollama and custom gateways all speak the same API, just with
//! different base URLs, so one client covers them.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_core::Stream;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::StreamExt;

use crate::{ChatRequest, ChatResponse, LlmProvider, StreamChunk};

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderErrorKind {
    RateLimit,
    ServerError,
    Timeout,
    AuthError,
    InvalidRequest,
    Unknown,
}

impl ProviderErrorKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimit,
            401 | 403 => Self::AuthError,
            400 | 422 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::ServerError | Self::Timeout)
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

/// Groq's OpenAI-compatible endpoint (the default deployment target).
/// https://console.groq.com/docs/api
pub fn groq(api_key: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, "https://api.groq.com/openai/v1")
}

pub fn openai(api_key: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, "https://api.openai.com/v1")
}

/// Ollama needs no key, but the header must carry something.
pub fn ollama(base_url: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new("ollama", base_url)
}

pub fn custom(api_key: impl Into<String>, base_url: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, base_url)
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn to_api_request(request: ChatRequest, stream: bool) -> ApiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system {
            messages.push(ApiMessage {
                role: "system".into(),
                content: system,
            });
        }
        messages.extend(request.messages.into_iter().map(|m| ApiMessage {
            role: m.role,
            content: m.content,
        }));

        ApiRequest {
            model: request.model,
            messages,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    async fn send(&self, body: &ApiRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.api_base);
        let resp = match self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(anyhow!(
                    "openai api error (timeout) [retryable]: request timed out after 60s"
                ));
            }
            Err(e) if e.is_connect() => {
                return Err(anyhow!("openai api error (connect) [retryable]: {e}"));
            }
            Err(e) => return Err(e.into()),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(format_api_error(status, &text));
        }
        Ok(resp)
    }
}

fn format_api_error(status: StatusCode, body: &str) -> anyhow::Error {
    let kind = ProviderErrorKind::from_status(status);
    let marker = if kind.is_retryable() { " [retryable]" } else { "" };
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_owned))
        .unwrap_or_else(|| body.chars().take(200).collect());
    anyhow!("openai api error ({status}){marker}: {detail}")
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn invoke(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = Self::to_api_request(request, false);
        let resp = self.send(&body).await?;
        let parsed: ApiResponse = resp.json().await?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("openai api returned no choices"))?;

        Ok(ChatResponse {
            text: choice.message.map(|m| m.content).unwrap_or_default(),
            input_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
            stop_reason: choice.finish_reason,
        })
    }

    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>> {
        let body = Self::to_api_request(request, true);
        let resp = self.send(&body).await?;
        let sse_stream = parse_sse_stream(resp.bytes_stream());
        Ok(Box::pin(sse_stream))
    }
}

fn parse_sse_stream(
    byte_stream: impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>>
        + Send
        + 'static,
) -> impl Stream<Item = Result<StreamChunk>> + Send {
    async_stream::stream! {
        tokio::pin!(byte_stream);
        let mut buffer = String::new();
        let mut finished = false;

        while let Some(chunk_result) = byte_stream.next().await {
            match chunk_result {
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    while let Some(pos) = buffer.find("\n\n") {
                        let event_text = buffer[..pos].to_string();
                        buffer = buffer[pos + 2..].to_string();

                        for line in event_text.lines() {
                            let Some(data) = line.strip_prefix("data: ") else {
                                continue;
                            };

                            if data == "[DONE]" {
                                if !finished {
                                    finished = true;
                                    yield Ok(StreamChunk {
                                        delta: String::new(),
                                        is_final: true,
                                        stop_reason: Some("stop".into()),
                                    });
                                }
                                continue;
                            }

                            match serde_json::from_str::<serde_json::Value>(data) {
                                Ok(event) => {
                                    if let Some(chunk) = parse_sse_event(&event) {
                                        if chunk.is_final {
                                            finished = true;
                                        }
                                        yield Ok(chunk);
                                    }
                                }
                                Err(e) => {
                                    yield Err(anyhow!("invalid sse event payload: {e}"));
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    yield Err(anyhow!("stream error: {e}"));
                    return;
                }
            }
        }
    }
}

fn parse_sse_event(event: &serde_json::Value) -> Option<StreamChunk> {
    let choice = event.get("choices")?.get(0)?;
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let delta = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    if delta.is_empty() && finish_reason.is_none() {
        // Role-announcement frames carry neither text nor a stop reason.
        return None;
    }

    Some(StreamChunk {
        is_final: finish_reason.is_some(),
        stop_reason: finish_reason,
        delta,
    })
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: Option<ApiMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
