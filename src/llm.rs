//! LLM provider abstraction
//!
//! Provides a common interface for the hosted chat model.

mod error;
mod openai;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAiService;
pub use types::*;

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request and wait for the whole answer
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Make a completion request and receive the answer incrementally
    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    finish_reason = ?response.finish_reason,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    "LLM request failed"
                );
            }
        }

        result
    }

    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let start = Instant::now();
        let model_id = self.model_id.clone();

        let inner = match self.inner.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    model = %model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    "LLM stream failed to open"
                );
                return Err(e);
            }
        };

        let logged = async_stream::stream! {
            let mut inner = inner;
            let mut fragments = 0usize;
            let mut chars = 0usize;
            let mut failed = false;
            while let Some(item) = inner.next().await {
                match &item {
                    Ok(text) => {
                        fragments += 1;
                        chars += text.chars().count();
                    }
                    Err(e) => {
                        failed = true;
                        tracing::error!(
                            model = %model_id,
                            duration_ms = %start.elapsed().as_millis(),
                            fragments,
                            error = %e.message,
                            kind = ?e.kind,
                            "LLM stream failed"
                        );
                    }
                }
                yield item;
            }
            if !failed {
                tracing::info!(
                    model = %model_id,
                    duration_ms = %start.elapsed().as_millis(),
                    fragments,
                    chars,
                    "LLM stream completed"
                );
            }
        };

        Ok(Box::pin(logged))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
