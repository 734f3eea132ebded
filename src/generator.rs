//! Response generation
//!
//! Stateless apart from the model client it holds: history in, next
//! assistant message out. Failures are returned to the caller untouched;
//! there is no retry or timeout here.

mod title;

use crate::db::Message;
use crate::llm::{LlmError, LlmRequest, LlmService, TextStream};
use std::sync::Arc;

pub struct Generator {
    llm: Arc<dyn LlmService>,
    system_prompt: Option<String>,
    max_tokens: Option<u32>,
}

impl Generator {
    pub fn new(
        llm: Arc<dyn LlmService>,
        system_prompt: Option<String>,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            llm,
            system_prompt,
            max_tokens,
        }
    }

    pub fn model_id(&self) -> &str {
        self.llm.model_id()
    }

    fn request(&self, history: &[Message]) -> LlmRequest {
        LlmRequest::from_history(self.system_prompt.clone(), history)
            .with_max_tokens(self.max_tokens)
    }

    /// Produce the next assistant message in one piece
    #[allow(dead_code)] // Conversations stream; kept for one-shot callers
    pub async fn generate(&self, history: &[Message]) -> Result<Message, LlmError> {
        let response = self.llm.complete(&self.request(history)).await?;
        Ok(Message::assistant(response.text))
    }

    /// Produce the next assistant message as a stream of text fragments
    pub async fn generate_stream(&self, history: &[Message]) -> Result<TextStream, LlmError> {
        self.llm.stream(&self.request(history)).await
    }

    /// Summarize a user message into a short conversation title
    pub async fn summarize_title(&self, text: &str) -> Result<String, LlmError> {
        let response = self.llm.complete(&title::title_request(text)).await?;
        title::clean_title(&response.text)
            .ok_or_else(|| LlmError::unknown("Model returned an empty title"))
    }
}
