//! Effects produced by state transitions

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append the user's message to the conversation
    PersistUserMessage { text: String },

    /// Start streaming a reply for the stored history (spawns as background task)
    RequestGeneration,

    /// Append the assistant's message; yields `AssistantPersisted`
    PersistAssistantMessage { text: String },

    /// Summarize the first user message into a title (spawns as background task)
    RequestTitle { source: String },

    /// Store the generated title
    PersistTitle { title: String },

    /// Bump the conversation's recency
    TouchConversation,

    /// Tell connected clients the state changed
    NotifyStateChange,

    /// Tell connected clients the turn is over and input is open again
    NotifyTurnDone,

    /// Show an error to connected clients
    NotifyError { message: String },
}

impl Effect {
    pub fn notify_error(message: impl Into<String>) -> Self {
        Effect::NotifyError {
            message: message.into(),
        }
    }
}
