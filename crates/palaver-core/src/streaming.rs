//! Streaming response coordination.
//!
//! Drives the model's chunk stream, forwarding each delta to the transport
//! sink the moment it arrives while accumulating the full reply for
//! persistence. Cancellation is cooperative: the token is checked between
//! chunks, and nothing is forwarded after it fires.

use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_core::Stream;
use palaver_provider::StreamChunk;
use palaver_schema::SessionEvent;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Transport seam: the orchestrator emits session events through this and
/// never touches sockets directly.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: SessionEvent) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// A stream that produces nothing within this bound is treated as a
    /// model failure, not an indefinite hang.
    pub chunk_timeout: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of pumping one stream. `text` holds everything forwarded before
/// the stream ended, errored or was cancelled — partial output is never
/// discarded.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub text: String,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl StreamOutcome {
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

pub async fn pump(
    mut stream: ChunkStream,
    sink: &dyn EventSink,
    cancel: &CancellationToken,
    config: &StreamingConfig,
) -> StreamOutcome {
    let mut text = String::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return StreamOutcome { text, error: None, cancelled: true };
            }
            next = tokio::time::timeout(config.chunk_timeout, stream.next()) => next,
        };

        match next {
            Err(_) => {
                let message = format!(
                    "model produced no output within {}s",
                    config.chunk_timeout.as_secs()
                );
                let _ = sink
                    .emit(SessionEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                return StreamOutcome {
                    text,
                    error: Some(message),
                    cancelled: false,
                };
            }
            Ok(None) => {
                // Stream ended without an explicit final chunk.
                let _ = sink.emit(SessionEvent::Done).await;
                return StreamOutcome {
                    text,
                    error: None,
                    cancelled: false,
                };
            }
            Ok(Some(Err(e))) => {
                let message = format!("model stream failed: {e}");
                let _ = sink
                    .emit(SessionEvent::Error {
                        message: message.clone(),
                    })
                    .await;
                return StreamOutcome {
                    text,
                    error: Some(message),
                    cancelled: false,
                };
            }
            Ok(Some(Ok(chunk))) => {
                // The producer may have raced the token; re-check before
                // forwarding so no delta ever follows cancellation.
                if cancel.is_cancelled() {
                    return StreamOutcome {
                        text,
                        error: None,
                        cancelled: true,
                    };
                }

                if !chunk.delta.is_empty() {
                    if sink
                        .emit(SessionEvent::Delta {
                            text: chunk.delta.clone(),
                        })
                        .await
                        .is_err()
                    {
                        // Transport gone mid-stream: same handling as an
                        // explicit cancellation.
                        return StreamOutcome {
                            text,
                            error: None,
                            cancelled: true,
                        };
                    }
                    text.push_str(&chunk.delta);
                }

                if chunk.is_final {
                    let _ = sink.emit(SessionEvent::Done).await;
                    return StreamOutcome {
                        text,
                        error: None,
                        cancelled: false,
                    };
                }
            }
        }
    }
}
