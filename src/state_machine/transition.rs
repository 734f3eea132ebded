//! Pure state transition function

use super::{ConvContext, ConvState, Effect, Event};
use crate::llm::LlmErrorKind;
use thiserror::Error;

/// Appended to a reply whose stream broke after producing some text
pub const INTERRUPTED_MARKER: &str = "\n\n[response interrupted]";

const EMPTY_RESPONSE_MESSAGE: &str = "The model returned an empty response";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A response is still in progress, wait for it to finish")]
    Busy,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs, with no I/O.
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User messages
        // ============================================================
        (ConvState::Idle, Event::UserMessage { text }) => {
            if text.trim().is_empty() {
                return Err(TransitionError::EmptyMessage);
            }
            let title_source = context.is_first_exchange().then(|| text.clone());
            Ok(TransitionResult::new(ConvState::Sending { title_source })
                .with_effect(Effect::PersistUserMessage { text })
                .with_effect(Effect::NotifyStateChange)
                .with_effect(Effect::RequestGeneration))
        }

        (_, Event::UserMessage { .. }) => Err(TransitionError::Busy),

        // ============================================================
        // Generation outcome
        // ============================================================
        (ConvState::Sending { title_source }, Event::GenerationComplete { text }) => {
            if text.trim().is_empty() {
                return Ok(back_to_idle(Some(EMPTY_RESPONSE_MESSAGE.to_string())));
            }
            Ok(TransitionResult::new(ConvState::Appending {
                title_source: title_source.clone(),
            })
            .with_effect(Effect::NotifyStateChange)
            .with_effect(Effect::PersistAssistantMessage { text }))
        }

        (
            ConvState::Sending { title_source },
            Event::GenerationFailed {
                partial,
                message,
                kind,
            },
        ) => {
            let message = failure_message(message, kind);
            if partial.trim().is_empty() {
                return Ok(back_to_idle(Some(message)));
            }
            // Keep what the user already saw, flagged as cut short
            Ok(TransitionResult::new(ConvState::Appending {
                title_source: title_source.clone(),
            })
            .with_effect(Effect::notify_error(message))
            .with_effect(Effect::NotifyStateChange)
            .with_effect(Effect::PersistAssistantMessage {
                text: format!("{partial}{INTERRUPTED_MARKER}"),
            }))
        }

        // ============================================================
        // After the assistant message is stored
        // ============================================================
        (ConvState::Appending { title_source: Some(source) }, Event::AssistantPersisted) => {
            Ok(TransitionResult::new(ConvState::Titling)
                .with_effect(Effect::NotifyStateChange)
                .with_effect(Effect::RequestTitle {
                    source: source.clone(),
                }))
        }

        (ConvState::Appending { title_source: None }, Event::AssistantPersisted) => {
            Ok(TransitionResult::new(ConvState::Idle).with_effects([
                Effect::TouchConversation,
                Effect::NotifyStateChange,
                Effect::NotifyTurnDone,
            ]))
        }

        // ============================================================
        // Titling
        // ============================================================
        (ConvState::Titling, Event::TitleGenerated { title }) => {
            Ok(TransitionResult::new(ConvState::Idle).with_effects([
                Effect::PersistTitle { title },
                Effect::NotifyStateChange,
                Effect::NotifyTurnDone,
            ]))
        }

        (ConvState::Titling, Event::TitleFailed { message }) => Ok(back_to_idle(Some(format!(
            "Could not generate a title: {message}"
        )))),

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {state:?}"
        ))),
    }
}

/// Tell the user when resending is worth a try
fn failure_message(message: String, kind: LlmErrorKind) -> String {
    if kind.is_transient() {
        format!("{message}. Please try again.")
    } else {
        message
    }
}

/// End the turn, optionally surfacing an error first
fn back_to_idle(error: Option<String>) -> TransitionResult {
    TransitionResult::new(ConvState::Idle)
        .with_effects(error.map(Effect::notify_error))
        .with_effects([Effect::NotifyStateChange, Effect::NotifyTurnDone])
}
