//! Events that can occur in a conversation

use crate::llm::LlmErrorKind;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
    },

    // Generation events
    GenerationComplete {
        text: String,
    },
    GenerationFailed {
        /// Text streamed before the failure, possibly empty
        partial: String,
        message: String,
        kind: LlmErrorKind,
    },

    // Storage events
    AssistantPersisted,

    // Title events
    TitleGenerated {
        title: String,
    },
    TitleFailed {
        message: String,
    },
}
