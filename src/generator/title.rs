//! Conversation title prompt and cleanup
//!
//! Titles are produced from the first user message of a conversation.

use crate::llm::{LlmMessage, LlmRequest};

const TITLE_PROMPT: &str = "You are a helpful assistant. Summarize the following user message into a short, 4-5 word phrase to be used as a chat title. Do not use quotes.";

/// Longest title kept, in characters
pub const MAX_TITLE_LENGTH: usize = 60;

/// Longest slice of the user message sent for summarizing, in characters
const MAX_SOURCE_CHARS: usize = 500;

const QUOTES: &[char] = &['"', '\'', '`', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];

/// Build the one-shot request that asks for a title
pub fn title_request(message_text: &str) -> LlmRequest {
    let source: String = if message_text.chars().count() > MAX_SOURCE_CHARS {
        let mut truncated: String = message_text.chars().take(MAX_SOURCE_CHARS).collect();
        truncated.push_str("...");
        truncated
    } else {
        message_text.to_string()
    };

    LlmRequest {
        system: Some(TITLE_PROMPT.to_string()),
        messages: vec![LlmMessage::user(source)],
        // Title should be very short
        max_tokens: Some(50),
    }
}

/// Normalize raw model output into a display title.
///
/// Returns `None` when nothing usable is left.
pub fn clean_title(raw: &str) -> Option<String> {
    let mut title = raw.trim();
    loop {
        let stripped = title
            .strip_prefix(QUOTES)
            .and_then(|t| t.strip_suffix(QUOTES))
            .map(str::trim);
        match stripped {
            Some(inner) => title = inner,
            None => break,
        }
    }
    let title = title.trim_end_matches('.').trim();

    let mut result = String::new();
    for word in title.split_whitespace() {
        let extra = if result.is_empty() { 0 } else { 1 };
        if result.chars().count() + extra + word.chars().count() > MAX_TITLE_LENGTH {
            if result.is_empty() {
                result = word.chars().take(MAX_TITLE_LENGTH).collect();
            }
            break;
        }
        if extra == 1 {
            result.push(' ');
        }
        result.push_str(word);
    }

    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}
