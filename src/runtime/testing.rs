//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::ConversationStore;
use crate::db::{Message, MessageRecord};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, TextStream};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ============================================================================
// Mock LLM Service
// ============================================================================

/// One scripted model answer
#[derive(Debug, Clone)]
enum MockReply {
    Fragments(Vec<String>),
    /// Streams the fragments, then fails
    Interrupted(Vec<String>, LlmError),
    Error(LlmError),
}

/// Mock LLM service that returns queued replies in order
pub struct MockLlmService {
    replies: Mutex<VecDeque<MockReply>>,
    /// Record of all requests made
    requests: Mutex<Vec<LlmRequest>>,
    /// When set, streams pause after their first fragment until notified
    gate: Option<Arc<Notify>>,
}

impl MockLlmService {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Hold every stream after its first fragment until `gate` is notified
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    /// Queue a reply delivered in one piece
    pub fn queue_text(&self, text: &str) {
        self.push(MockReply::Fragments(vec![text.to_string()]));
    }

    /// Queue a reply delivered as several fragments
    pub fn queue_fragments(&self, fragments: &[&str]) {
        self.push(MockReply::Fragments(
            fragments.iter().map(ToString::to_string).collect(),
        ));
    }

    /// Queue a reply that breaks off after some fragments
    pub fn queue_interrupted(&self, fragments: &[&str], error: LlmError) {
        self.push(MockReply::Interrupted(
            fragments.iter().map(ToString::to_string).collect(),
            error,
        ));
    }

    /// Queue an error returned before any output
    pub fn queue_error(&self, error: LlmError) {
        self.push(MockReply::Error(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn push(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn next_reply(&self, request: &LlmRequest) -> MockReply {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockReply::Error(LlmError::network("No mock response queued")))
    }
}

impl Default for MockLlmService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        match self.next_reply(request) {
            MockReply::Fragments(parts) => Ok(LlmResponse {
                text: parts.concat(),
                ..LlmResponse::default()
            }),
            MockReply::Interrupted(_, e) | MockReply::Error(e) => Err(e),
        }
    }

    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let (parts, failure) = match self.next_reply(request) {
            MockReply::Fragments(parts) => (parts, None),
            MockReply::Interrupted(parts, e) => (parts, Some(e)),
            MockReply::Error(e) => return Err(e),
        };
        let gate = self.gate.clone();

        Ok(Box::pin(async_stream::stream! {
            for (i, part) in parts.into_iter().enumerate() {
                yield Ok(part);
                if let (0, Some(gate)) = (i, &gate) {
                    gate.notified().await;
                }
            }
            if let Some(e) = failure {
                yield Err(e);
            }
        }))
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory conversation store
#[derive(Default)]
pub struct InMemoryStorage {
    messages: Mutex<HashMap<String, Vec<MessageRecord>>>,
    titles: Mutex<HashMap<String, String>>,
    touched: Mutex<Vec<String>>,
    /// Make `append` fail, to exercise storage error handling
    pub fail_appends: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation with existing messages
    pub fn with_history(self, conv_id: &str, history: Vec<Message>) -> Self {
        {
            let mut messages = self.messages.lock().unwrap();
            let records = messages.entry(conv_id.to_string()).or_default();
            for message in history {
                records.push(Self::record(conv_id, records.len(), message));
            }
        }
        self
    }

    pub fn with_title(self, conv_id: &str, title: &str) -> Self {
        self.titles
            .lock()
            .unwrap()
            .insert(conv_id.to_string(), title.to_string());
        self
    }

    pub fn history(&self, conv_id: &str) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap()
            .get(conv_id)
            .map(|records| records.iter().map(|r| r.message.clone()).collect())
            .unwrap_or_default()
    }

    pub fn title(&self, conv_id: &str) -> Option<String> {
        self.titles.lock().unwrap().get(conv_id).cloned()
    }

    pub fn touched(&self) -> Vec<String> {
        self.touched.lock().unwrap().clone()
    }

    fn record(conv_id: &str, position: usize, message: Message) -> MessageRecord {
        MessageRecord {
            conversation_id: conv_id.to_string(),
            sequence_id: i64::try_from(position).unwrap() + 1,
            message,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryStorage {
    async fn append(&self, conv_id: &str, message: &Message) -> Result<MessageRecord, String> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err("disk I/O error".to_string());
        }
        let mut messages = self.messages.lock().unwrap();
        let records = messages.entry(conv_id.to_string()).or_default();
        let record = Self::record(conv_id, records.len(), message.clone());
        records.push(record.clone());
        Ok(record)
    }

    async fn get_history(&self, conv_id: &str) -> Result<Vec<Message>, String> {
        Ok(self.history(conv_id))
    }

    async fn set_title(&self, conv_id: &str, title: &str) -> Result<(), String> {
        self.titles
            .lock()
            .unwrap()
            .insert(conv_id.to_string(), title.to_string());
        Ok(())
    }

    async fn touch(&self, conv_id: &str) -> Result<bool, String> {
        self.touched.lock().unwrap().push(conv_id.to_string());
        Ok(self.titles.lock().unwrap().contains_key(conv_id))
    }
}

// ============================================================================
// Runtime tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::generator::Generator;
    use crate::runtime::{Activity, ConversationRuntime, SseEvent};
    use crate::state_machine::{ConvContext, Event};
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};

    const CONV: &str = "test-conv";

    struct Harness {
        event_tx: mpsc::Sender<Event>,
        events: broadcast::Receiver<SseEvent>,
        activity: Arc<Activity>,
    }

    impl Harness {
        fn start(storage: Arc<InMemoryStorage>, llm: Arc<MockLlmService>) -> Self {
            let message_count = storage.history(CONV).len();
            let (event_tx, event_rx) = mpsc::channel(32);
            let (broadcast_tx, events) = broadcast::channel(256);
            let activity = Arc::new(Activity::default());

            let runtime = ConversationRuntime::new(
                ConvContext::new(CONV, message_count),
                storage,
                Arc::new(Generator::new(llm, None, None)),
                event_rx,
                event_tx.downgrade(),
                broadcast_tx,
                activity.clone(),
            );
            tokio::spawn(async move { runtime.run().await });

            Self {
                event_tx,
                events,
                activity,
            }
        }

        async fn say(&self, text: &str) {
            self.event_tx
                .send(Event::UserMessage {
                    text: text.to_string(),
                })
                .await
                .unwrap();
        }

        /// Collect broadcast events up to and including the next `TurnDone`
        async fn until_turn_done(&mut self) -> Vec<SseEvent> {
            let mut seen = Vec::new();
            loop {
                let event = tokio::time::timeout(Duration::from_secs(2), self.events.recv())
                    .await
                    .expect("turn did not finish in time")
                    .unwrap();
                let done = matches!(event, SseEvent::TurnDone);
                seen.push(event);
                if done {
                    return seen;
                }
            }
        }

        /// Wait for the next `Error` event
        async fn next_error(&mut self) -> String {
            loop {
                let event = tokio::time::timeout(Duration::from_secs(2), self.events.recv())
                    .await
                    .expect("no error event")
                    .unwrap();
                if let SseEvent::Error { message } = event {
                    return message;
                }
            }
        }
    }

    fn errors(events: &[SseEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SseEvent::Error { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn states(events: &[SseEvent]) -> Vec<&'static str> {
        events
            .iter()
            .filter_map(|e| match e {
                SseEvent::StateChange { state } => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_first_turn_streams_persists_and_titles() {
        let storage = Arc::new(InMemoryStorage::new());
        let llm = Arc::new(MockLlmService::new());
        llm.queue_fragments(&["Hi ", "there", "!"]);
        llm.queue_text("\"Friendly Hello Exchange\"");

        let mut harness = Harness::start(storage.clone(), llm.clone());
        harness.say("Hello").await;
        let events = harness.until_turn_done().await;

        assert_eq!(
            storage.history(CONV),
            vec![Message::user("Hello"), Message::assistant("Hi there!")]
        );
        assert_eq!(storage.title(CONV).as_deref(), Some("Friendly Hello Exchange"));
        assert!(storage.touched().is_empty());

        let deltas: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                SseEvent::Delta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["Hi ", "there", "!"]);
        assert_eq!(states(&events), vec!["sending", "appending", "titling", "idle"]);
        assert!(events
            .iter()
            .any(|e| matches!(e, SseEvent::Title { title } if title == "Friendly Hello Exchange")));
        assert!(errors(&events).is_empty());
        assert!(!harness.activity.is_busy());

        // The generation request saw the full history; the title request saw the user text
        let requests = llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_later_turn_touches_and_keeps_title() {
        let storage = Arc::new(
            InMemoryStorage::new()
                .with_history(CONV, vec![Message::user("Hello"), Message::assistant("Hi!")])
                .with_title(CONV, "Greetings"),
        );
        let llm = Arc::new(MockLlmService::new());
        llm.queue_text("Tokyo in spring.");

        let mut harness = Harness::start(storage.clone(), llm.clone());
        harness.say("Where should I go?").await;
        let events = harness.until_turn_done().await;

        let history = storage.history(CONV);
        assert_eq!(history.len(), 4);
        assert_eq!(history[3], Message::assistant("Tokyo in spring."));
        assert_eq!(storage.title(CONV).as_deref(), Some("Greetings"));
        assert_eq!(storage.touched(), vec![CONV.to_string()]);
        assert_eq!(states(&events), vec!["sending", "appending", "idle"]);

        // Generation received the whole stored history, oldest first
        let requests = llm.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages.len(), 3);
        assert_eq!(requests[0].messages[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_message_while_busy_is_rejected() {
        let gate = Arc::new(Notify::new());
        let storage = Arc::new(InMemoryStorage::new());
        let llm = Arc::new(MockLlmService::gated(gate.clone()));
        llm.queue_text("First answer");
        llm.queue_text("First Answer Title");

        let mut harness = Harness::start(storage.clone(), llm);
        harness.say("one").await;
        harness.say("two").await;

        let error = harness.next_error().await;
        assert!(error.contains("still in progress"), "got {error}");
        assert!(harness.activity.is_busy());

        gate.notify_one();
        harness.until_turn_done().await;

        let history = storage.history(CONV);
        assert_eq!(
            history,
            vec![Message::user("one"), Message::assistant("First answer")]
        );
    }

    #[tokio::test]
    async fn test_interrupted_stream_keeps_partial_text() {
        let storage = Arc::new(
            InMemoryStorage::new()
                .with_history(CONV, vec![Message::user("Hi"), Message::assistant("Hello")])
                .with_title(CONV, "Hi"),
        );
        let llm = Arc::new(MockLlmService::new());
        llm.queue_interrupted(&["Step one: ", "pack"], LlmError::network("connection reset"));

        let mut harness = Harness::start(storage.clone(), llm);
        harness.say("How do I move house?").await;
        let events = harness.until_turn_done().await;

        let history = storage.history(CONV);
        let last = history.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Step one: pack\n\n[response interrupted]");
        assert_eq!(
            errors(&events),
            vec!["connection reset. Please try again.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failure_without_content_stores_only_user_message() {
        let storage = Arc::new(InMemoryStorage::new());
        let llm = Arc::new(MockLlmService::new());
        llm.queue_error(LlmError::rate_limit("Rate limit exceeded"));

        let mut harness = Harness::start(storage.clone(), llm.clone());
        harness.say("Hello").await;
        let events = harness.until_turn_done().await;

        assert_eq!(storage.history(CONV), vec![Message::user("Hello")]);
        assert!(storage.title(CONV).is_none());
        assert_eq!(
            errors(&events),
            vec!["Rate limit exceeded. Please try again.".to_string()]
        );
        assert_eq!(states(&events).last(), Some(&"idle"));
        // No title request was made
        assert_eq!(llm.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_title_failure_keeps_default() {
        let storage = Arc::new(InMemoryStorage::new());
        let llm = Arc::new(MockLlmService::new());
        llm.queue_text("Hello to you too");
        llm.queue_error(LlmError::server_error("Server error 503"));

        let mut harness = Harness::start(storage.clone(), llm);
        harness.say("Hello").await;
        let events = harness.until_turn_done().await;

        assert_eq!(storage.history(CONV).len(), 2);
        assert!(storage.title(CONV).is_none());
        let errors = errors(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Server error 503"));
    }

    #[tokio::test]
    async fn test_storage_failure_resets_to_idle() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.fail_appends.store(true, Ordering::SeqCst);
        let llm = Arc::new(MockLlmService::new());

        let mut harness = Harness::start(storage.clone(), llm.clone());
        harness.say("Hello").await;
        let events = harness.until_turn_done().await;

        assert!(errors(&events)[0].contains("disk I/O error"));
        assert!(!harness.activity.is_busy());
        assert!(llm.recorded_requests().is_empty());

        // The conversation accepts input again once storage recovers
        storage.fail_appends.store(false, Ordering::SeqCst);
        llm.queue_text("Back online");
        llm.queue_text("Recovery Chat");
        harness.say("Hello again").await;
        harness.until_turn_done().await;

        assert_eq!(
            storage.history(CONV),
            vec![Message::user("Hello again"), Message::assistant("Back online")]
        );
    }
}
