//! Runtime for executing conversations
//!
//! One task per conversation, started lazily on first use. Each task owns the
//! conversation's state machine and serializes its events, so a turn runs to
//! completion before the next user message is considered. Runtimes that are
//! idle and unwatched are released by a periodic sweep and restarted from the
//! database on next use.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;
pub use traits::*;

use crate::db::{Database, MessageRecord};
use crate::generator::Generator;
use crate::state_machine::{ConvContext, Event};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime = ConversationRuntime<DatabaseStorage>;

/// Manager for all conversation runtimes
pub struct RuntimeManager {
    db: Database,
    generator: Arc<Generator>,
    runtimes: RwLock<HashMap<String, ConversationHandle>>,
}

/// Handle to interact with a running conversation
#[derive(Clone)]
pub struct ConversationHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
    activity: Arc<Activity>,
}

impl ConversationHandle {
    /// Whether a turn is in progress
    pub fn is_busy(&self) -> bool {
        self.activity.is_busy()
    }

    /// Nothing in flight and nobody listening
    fn is_releasable(&self) -> bool {
        self.activity.is_quiet() && self.broadcast_tx.receiver_count() == 0
    }
}

/// State shared between a runtime task and its handle
#[derive(Debug, Default)]
pub struct Activity {
    busy: AtomicBool,
    /// User messages sent to the runtime but not yet processed
    queued: AtomicUsize,
    /// Reply text streamed so far in the current turn
    partial: Mutex<String>,
}

impl Activity {
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    fn enqueue(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn dequeue(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn is_quiet(&self) -> bool {
        !self.is_busy() && self.queued.load(Ordering::SeqCst) == 0
    }

    /// Record a reply fragment and relay it, atomically with respect to `subscribe`
    pub(crate) fn relay_delta(&self, broadcast_tx: &broadcast::Sender<SseEvent>, text: String) {
        let mut partial = self.partial.lock().unwrap_or_else(PoisonError::into_inner);
        partial.push_str(&text);
        let _ = broadcast_tx.send(SseEvent::Delta { text });
    }

    pub(crate) fn clear_partial(&self) {
        self.partial
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Subscribe together with the reply text already relayed, so the two
    /// neither overlap nor leave a gap
    fn subscribe(&self, broadcast_tx: &broadcast::Sender<SseEvent>) -> Subscription {
        let partial = self.partial.lock().unwrap_or_else(PoisonError::into_inner);
        Subscription {
            events: broadcast_tx.subscribe(),
            partial: partial.clone(),
        }
    }
}

/// A new listener on a conversation
pub struct Subscription {
    pub events: broadcast::Receiver<SseEvent>,
    /// Reply text streamed before the listener joined
    pub partial: String,
}

/// Events sent to SSE clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    Init {
        conversation_id: String,
        title: String,
        messages: Vec<MessageRecord>,
        busy: bool,
        /// Reply text streamed before this client connected
        partial: String,
    },
    Message {
        message: MessageRecord,
    },
    /// Streamed fragment of the assistant reply in progress
    Delta {
        text: String,
    },
    StateChange {
        state: &'static str,
    },
    Title {
        title: String,
    },
    TurnDone,
    Error {
        message: String,
    },
}

impl SseEvent {
    /// SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            SseEvent::Init { .. } => "init",
            SseEvent::Message { .. } => "message",
            SseEvent::Delta { .. } => "delta",
            SseEvent::StateChange { .. } => "state_change",
            SseEvent::Title { .. } => "title",
            SseEvent::TurnDone => "turn_done",
            SseEvent::Error { .. } => "error",
        }
    }
}

impl RuntimeManager {
    pub fn new(db: Database, generator: Arc<Generator>) -> Self {
        Self {
            db,
            generator,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create a runtime for a conversation
    pub async fn get_or_create(&self, conversation_id: &str) -> Result<ConversationHandle, String> {
        // Check if already running
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(conversation_id) {
                return Ok(handle.clone());
            }
        }

        let mut runtimes = self.runtimes.write().await;
        // Another caller may have started it while we waited for the lock
        if let Some(handle) = runtimes.get(conversation_id) {
            return Ok(handle.clone());
        }

        let message_count = self
            .db
            .message_count(conversation_id)
            .map_err(|e| e.to_string())?;
        let context = ConvContext::new(
            conversation_id,
            usize::try_from(message_count).unwrap_or_default(),
        );

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(256);
        let activity = Arc::new(Activity::default());

        let runtime: ProductionRuntime = ConversationRuntime::new(
            context,
            DatabaseStorage::new(self.db.clone()),
            self.generator.clone(),
            event_rx,
            event_tx.downgrade(),
            broadcast_tx.clone(),
            activity.clone(),
        );

        // Start runtime in background
        let conv_id = conversation_id.to_string();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(conv_id = %conv_id, "Conversation runtime finished");
        });

        let handle = ConversationHandle {
            event_tx,
            broadcast_tx,
            activity,
        };
        runtimes.insert(conversation_id.to_string(), handle.clone());

        Ok(handle)
    }

    /// Queue a user message for a conversation
    pub async fn send_user_message(
        &self,
        conversation_id: &str,
        text: String,
    ) -> Result<(), String> {
        loop {
            self.get_or_create(conversation_id).await?;
            // Queue under the read lock so a sweep cannot release the runtime in between
            let runtimes = self.runtimes.read().await;
            let Some(handle) = runtimes.get(conversation_id) else {
                continue;
            };
            handle.activity.enqueue();
            return handle
                .event_tx
                .try_send(Event::UserMessage { text })
                .map_err(|e| {
                    handle.activity.dequeue();
                    format!("Failed to send event: {e}")
                });
        }
    }

    /// Subscribe to conversation updates
    pub async fn subscribe(&self, conversation_id: &str) -> Result<Subscription, String> {
        loop {
            self.get_or_create(conversation_id).await?;
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(conversation_id) {
                return Ok(handle.activity.subscribe(&handle.broadcast_tx));
            }
        }
    }

    /// Drop runtimes that are idle with no listeners. Their tasks stop once
    /// the last sender goes away.
    pub async fn release_idle(&self) -> usize {
        let mut runtimes = self.runtimes.write().await;
        let before = runtimes.len();
        runtimes.retain(|_, handle| !handle.is_releasable());
        let released = before - runtimes.len();
        if released > 0 {
            tracing::debug!(
                released,
                remaining = runtimes.len(),
                "Released idle conversation runtimes"
            );
        }
        released
    }

    /// Run `release_idle` every `period` for the life of the process
    pub fn spawn_idle_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                manager.release_idle().await;
            }
        })
    }

    /// Whether a turn is in progress. Conversations without a running
    /// runtime are idle.
    pub async fn is_busy(&self, conversation_id: &str) -> bool {
        self.runtimes
            .read()
            .await
            .get(conversation_id)
            .is_some_and(ConversationHandle::is_busy)
    }

    /// Get the database handle
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn generator(&self) -> &Arc<Generator> {
        &self.generator
    }

    #[cfg(test)]
    async fn live_runtimes(&self) -> usize {
        self.runtimes.read().await.len()
    }
}
