//! Conversation runtime executor

use super::traits::ConversationStore;
use super::{Activity, SseEvent};

use crate::db::Message;
use crate::generator::Generator;
use crate::state_machine::{transition, ConvContext, ConvState, Effect, Event};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Conversation runtime, generic over storage
pub struct ConversationRuntime<S>
where
    S: ConversationStore + Clone + 'static,
{
    context: ConvContext,
    state: ConvState,
    storage: S,
    generator: Arc<Generator>,
    event_rx: mpsc::Receiver<Event>,
    /// Weak so the task stops once its handle is released and no reply is pending
    event_tx: mpsc::WeakSender<Event>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    activity: Arc<Activity>,
}

impl<S> ConversationRuntime<S>
where
    S: ConversationStore + Clone + 'static,
{
    pub fn new(
        context: ConvContext,
        storage: S,
        generator: Arc<Generator>,
        event_rx: mpsc::Receiver<Event>,
        event_tx: mpsc::WeakSender<Event>,
        broadcast_tx: broadcast::Sender<SseEvent>,
        activity: Arc<Activity>,
    ) -> Self {
        Self {
            context,
            state: ConvState::Idle,
            storage,
            generator,
            event_rx,
            event_tx,
            broadcast_tx,
            activity,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            conv_id = %self.context.conversation_id,
            message_count = self.context.message_count,
            "Starting conversation runtime"
        );

        // Process events in a loop - no recursion
        while let Some(event) = self.event_rx.recv().await {
            let queued_by_user = matches!(event, Event::UserMessage { .. });
            if let Err(e) = self.process_event(event).await {
                tracing::warn!(
                    conv_id = %self.context.conversation_id,
                    error = %e,
                    "Event rejected"
                );
                let _ = self.broadcast_tx.send(SseEvent::Error { message: e });
            }
            // Only after the busy flag reflects the message
            if queued_by_user {
                self.activity.dequeue();
            }
        }

        tracing::info!(conv_id = %self.context.conversation_id, "Conversation runtime stopped");
    }

    async fn process_event(&mut self, event: Event) -> Result<(), String> {
        // Effects may synthesize follow-up events; handle them before the next input
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            // Pure state transition. Rejections are user-facing (e.g. "busy")
            let result =
                transition(&self.state, &self.context, current_event).map_err(|e| e.to_string())?;

            let old_state = std::mem::replace(&mut self.state, result.new_state);
            self.activity.set_busy(self.state.is_busy());
            tracing::debug!(
                conv_id = %self.context.conversation_id,
                from = old_state.name(),
                to = self.state.name(),
                "State transition"
            );

            for effect in result.effects {
                match self.execute_effect(effect).await {
                    Ok(Some(generated_event)) => events_to_process.push(generated_event),
                    Ok(None) => {}
                    Err(e) => {
                        self.abort_turn(&e);
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }

    /// An effect failed mid-turn: drop the rest of the turn and reopen input
    fn abort_turn(&mut self, error: &str) {
        tracing::error!(conv_id = %self.context.conversation_id, error = %error, "Turn aborted");
        self.state = ConvState::Idle;
        self.activity.set_busy(false);
        let _ = self.broadcast_tx.send(SseEvent::Error {
            message: error.to_string(),
        });
        let _ = self.broadcast_tx.send(SseEvent::StateChange {
            state: self.state.name(),
        });
        let _ = self.broadcast_tx.send(SseEvent::TurnDone);
    }

    /// Sender for a background task to report its outcome on
    fn reply_sender(&self) -> Result<mpsc::Sender<Event>, String> {
        self.event_tx
            .upgrade()
            .ok_or_else(|| "Conversation runtime is shutting down".to_string())
    }

    /// Execute an effect and optionally return a generated event
    async fn execute_effect(&mut self, effect: Effect) -> Result<Option<Event>, String> {
        let conv_id = self.context.conversation_id.clone();
        match effect {
            Effect::PersistUserMessage { text } => {
                let record = self
                    .storage
                    .append(&conv_id, &Message::user(text))
                    .await
                    .map_err(storage_error)?;
                self.context.message_count += 1;
                let _ = self.broadcast_tx.send(SseEvent::Message { message: record });
                Ok(None)
            }

            Effect::PersistAssistantMessage { text } => {
                let record = self
                    .storage
                    .append(&conv_id, &Message::assistant(text))
                    .await
                    .map_err(storage_error)?;
                self.context.message_count += 1;
                let _ = self.broadcast_tx.send(SseEvent::Message { message: record });
                Ok(Some(Event::AssistantPersisted))
            }

            Effect::RequestGeneration => {
                let history = self
                    .storage
                    .get_history(&conv_id)
                    .await
                    .map_err(storage_error)?;
                let generator = self.generator.clone();
                let event_tx = self.reply_sender()?;
                let broadcast_tx = self.broadcast_tx.clone();
                let activity = self.activity.clone();

                tokio::spawn(async move {
                    tracing::info!(
                        conv_id = %conv_id,
                        messages = history.len(),
                        "Generating reply (background)"
                    );
                    let event = stream_reply(&generator, &history, &broadcast_tx, &activity).await;
                    let _ = event_tx.send(event).await;
                });

                // The outcome arrives later as an event from the spawned task
                Ok(None)
            }

            Effect::RequestTitle { source } => {
                let generator = self.generator.clone();
                let event_tx = self.reply_sender()?;

                tokio::spawn(async move {
                    let event = match generator.summarize_title(&source).await {
                        Ok(title) => Event::TitleGenerated { title },
                        Err(e) => Event::TitleFailed { message: e.message },
                    };
                    let _ = event_tx.send(event).await;
                });
                Ok(None)
            }

            Effect::PersistTitle { title } => {
                self.storage
                    .set_title(&conv_id, &title)
                    .await
                    .map_err(storage_error)?;
                tracing::info!(conv_id = %conv_id, title = %title, "Conversation titled");
                let _ = self.broadcast_tx.send(SseEvent::Title { title });
                Ok(None)
            }

            Effect::TouchConversation => {
                if !self.storage.touch(&conv_id).await.map_err(storage_error)? {
                    tracing::debug!(conv_id = %conv_id, "No title record to touch");
                }
                Ok(None)
            }

            Effect::NotifyStateChange => {
                let _ = self.broadcast_tx.send(SseEvent::StateChange {
                    state: self.state.name(),
                });
                Ok(None)
            }

            Effect::NotifyTurnDone => {
                let _ = self.broadcast_tx.send(SseEvent::TurnDone);
                Ok(None)
            }

            Effect::NotifyError { message } => {
                tracing::warn!(conv_id = %conv_id, error = %message, "Turn error");
                let _ = self.broadcast_tx.send(SseEvent::Error { message });
                Ok(None)
            }
        }
    }
}

fn storage_error(error: String) -> String {
    format!("Storage error: {error}")
}

/// Stream one reply, relaying fragments to subscribers, and report the outcome
async fn stream_reply(
    generator: &Generator,
    history: &[Message],
    broadcast_tx: &broadcast::Sender<SseEvent>,
    activity: &Activity,
) -> Event {
    activity.clear_partial();
    let event = relay_reply(generator, history, broadcast_tx, activity).await;
    activity.clear_partial();
    event
}

async fn relay_reply(
    generator: &Generator,
    history: &[Message],
    broadcast_tx: &broadcast::Sender<SseEvent>,
    activity: &Activity,
) -> Event {
    let mut stream = match generator.generate_stream(history).await {
        Ok(stream) => stream,
        Err(e) => {
            return Event::GenerationFailed {
                partial: String::new(),
                message: e.message,
                kind: e.kind,
            }
        }
    };

    let mut text = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                text.push_str(&fragment);
                activity.relay_delta(broadcast_tx, fragment);
            }
            Err(e) => {
                return Event::GenerationFailed {
                    partial: text,
                    message: e.message,
                    kind: e.kind,
                }
            }
        }
    }

    Event::GenerationComplete { text }
}
