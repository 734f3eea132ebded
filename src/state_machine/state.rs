//! Conversation state types

/// Where a conversation is in its current turn
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConvState {
    /// Ready for user input, no pending operations
    #[default]
    Idle,

    /// User message persisted, waiting on the model
    Sending {
        /// The user's text when this is the conversation's first exchange
        title_source: Option<String>,
    },

    /// Assistant message being persisted
    Appending { title_source: Option<String> },

    /// Waiting on title generation for a first exchange
    Titling,
}

impl ConvState {
    /// Wire name used in `state_change` events
    pub fn name(&self) -> &'static str {
        match self {
            ConvState::Idle => "idle",
            ConvState::Sending { .. } => "sending",
            ConvState::Appending { .. } => "appending",
            ConvState::Titling => "titling",
        }
    }

    /// Whether a turn is in progress
    pub fn is_busy(&self) -> bool {
        !matches!(self, ConvState::Idle)
    }
}

/// Context for a conversation
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub conversation_id: String,
    /// Number of stored messages, kept current by the runtime
    pub message_count: usize,
}

impl ConvContext {
    pub fn new(conversation_id: impl Into<String>, message_count: usize) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_count,
        }
    }

    /// A user message arriving now would open the conversation
    pub fn is_first_exchange(&self) -> bool {
        self.message_count == 0
    }
}
