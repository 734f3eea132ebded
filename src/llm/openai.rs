//! `OpenAI`-compatible chat completions provider (Groq, `OpenAI`, local servers)

use super::types::{LlmMessage, LlmRequest, LlmResponse, TextStream, Usage};
use super::{LlmError, LlmService};
use crate::config::LlmConfig;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// OpenAI-compatible service implementation
pub struct OpenAiService {
    client: Client,
    api_key: String,
    url: String,
    model: String,
    temperature: Option<f32>,
}

impl OpenAiService {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn translate_request(&self, request: &LlmRequest, stream: bool) -> OpenAiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system) = &request.system {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(translate_message));

        OpenAiRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: request.max_tokens,
            stream,
        }
    }

    async fn send(&self, body: &OpenAiRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read error response: {e}")))?;
        let message = serde_json::from_str::<OpenAiErrorResponse>(&body)
            .map_or(body, |resp| resp.error.message);
        Err(LlmError::from_status(status.as_u16(), &message))
    }

    fn normalize_response(resp: OpenAiResponse) -> Result<LlmResponse, LlmError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::unknown("No choices in response"))?;

        let usage = resp.usage.unwrap_or_default();
        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: Usage {
                input_tokens: u64::from(usage.prompt_tokens),
                output_tokens: u64::from(usage.completion_tokens),
            },
        })
    }
}

#[async_trait]
impl LlmService for OpenAiService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = self.translate_request(request, false);
        let response = self.send(&body).await?;

        let text = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
        let parsed: OpenAiResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {text}"))
        })?;

        Self::normalize_response(parsed)
    }

    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let body = self.translate_request(request, true);
        let response = self.send(&body).await?;
        Ok(Box::pin(text_fragments(response.bytes_stream())))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn translate_message(msg: &LlmMessage) -> OpenAiMessage {
    OpenAiMessage {
        role: msg.role.as_str().to_string(),
        content: msg.content.clone(),
    }
}

// ============================================================
// Server-sent event decoding
// ============================================================

/// One meaningful line of an SSE body
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Data(String),
    Done,
}

/// Splits an SSE byte stream into lines, holding back incomplete lines
/// (and incomplete UTF-8 sequences) until the rest arrives.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(line) = parse_sse_line(&String::from_utf8_lossy(&raw)) {
                lines.push(line);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<SseLine> {
        let rest = std::mem::take(&mut self.buffer);
        parse_sse_line(&String::from_utf8_lossy(&rest))
    }
}

fn parse_sse_line(line: &str) -> Option<SseLine> {
    let data = line.trim().strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        Some(SseLine::Done)
    } else if data.is_empty() {
        None
    } else {
        Some(SseLine::Data(data.to_string()))
    }
}

/// Extract the text fragment from one streamed chunk
fn parse_stream_chunk(data: &str) -> Result<Option<String>, LlmError> {
    if let Ok(err) = serde_json::from_str::<OpenAiErrorResponse>(data) {
        return Err(LlmError::server_error(format!("Stream error: {}", err.error.message)));
    }

    let chunk: OpenAiStreamChunk = serde_json::from_str(data)
        .map_err(|e| LlmError::unknown(format!("Malformed stream chunk: {e} - data: {data}")))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty()))
}

/// Turn a raw SSE body into text fragments
fn text_fragments<S, B>(bytes: S) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = SseDecoder::default();
        let mut done = false;

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| LlmError::network(format!("Stream interrupted: {e}")))?;
            for line in decoder.push(chunk.as_ref()) {
                match line {
                    SseLine::Done => {
                        done = true;
                        break 'read;
                    }
                    SseLine::Data(data) => {
                        if let Some(text) = parse_stream_chunk(&data)? {
                            yield text;
                        }
                    }
                }
            }
        }

        if !done {
            if let Some(SseLine::Data(data)) = decoder.finish() {
                if let Some(text) = parse_stream_chunk(&data)? {
                    yield text;
                }
            }
        }
    }
}

// ============================================================
// Wire types
// ============================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}
