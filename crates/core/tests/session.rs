//! Chat Session Integration Tests
//!
//! Exercises the assembled session: dispatcher, live feed and responder gate
//! sharing one remote store.

mod common;

use async_trait::async_trait;
use common::{init_test_logging, with_timeout};
use courier_core::chat::{
    ConversationTurn, ResponseGenerator, ResponsePolicy, SessionDeps,
};
use courier_core::{
    ChatMessage, ChatSession, Config, ConnectivityMonitor, Draft, Error, LocalStore,
    MemoryRemoteStore, ResponderGate, Result, Sender,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Generator that records what it was asked.
#[derive(Default)]
struct RecordingGenerator {
    calls: Mutex<Vec<(String, Vec<ConversationTurn>)>>,
    fail: bool,
}

#[async_trait]
impl ResponseGenerator for RecordingGenerator {
    async fn generate(&self, prompt: &str, history: &[ConversationTurn]) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), history.to_vec()));
        if self.fail {
            return Err(Error::Generator("quota exceeded (429)".to_string()));
        }
        Ok(format!("answer to {}", prompt))
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.base_delay_ms = 1;
    config.responder.reply_delay_ms = 10;
    config.responder.unavailable_delay_ms = 5;
    config
}

struct Running {
    session: ChatSession,
    remote: Arc<MemoryRemoteStore>,
    updates: mpsc::UnboundedReceiver<Vec<ChatMessage>>,
    _store: LocalStore,
}

fn start(generator: Option<Arc<RecordingGenerator>>, policy: ResponsePolicy) -> Running {
    let remote = Arc::new(MemoryRemoteStore::new());
    let store = LocalStore::open_temporary(100).unwrap();
    let (tx, updates) = mpsc::unbounded_channel();

    let gate = ResponderGate::new(
        generator.map(|g| g as Arc<dyn ResponseGenerator>),
        policy,
    );
    let session = ChatSession::start(
        &fast_config(),
        &store,
        SessionDeps {
            remote: remote.clone(),
            connectivity: ConnectivityMonitor::new(true),
            gate,
            uploader: None,
        },
        move |messages| {
            let _ = tx.send(messages);
        },
    );

    Running {
        session,
        remote,
        updates,
        _store: store,
    }
}

fn user(text: &str) -> Draft {
    Draft::text(Sender::new("user-1", "User"), text)
}

/// Gate enabled, online "question": the remote gains the user message, then the AI reply.
#[tokio::test]
async fn test_question_gets_ai_reply_after_user_message() {
    init_test_logging();
    let generator = Arc::new(RecordingGenerator::default());
    let mut running = start(Some(generator.clone()), ResponsePolicy::Always);

    let outcome = running.session.submit(user("question")).await.unwrap();
    with_timeout(outcome.reply.expect("reply scheduled"))
        .await
        .unwrap();

    let records = running.remote.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].text(), Some("question"));
    assert!(!records[0].is_ai());
    assert!(records[1].is_ai());
    assert_eq!(records[1].sender_id(), "assistant");
    assert_eq!(records[1].text(), Some("answer to question"));
    assert!(records[0].server_timestamp() < records[1].server_timestamp());

    // The feed delivers both records
    with_timeout(async {
        while running.updates.recv().await.unwrap().len() < 2 {}
    })
    .await;
}

#[tokio::test]
async fn test_history_excludes_triggering_message() {
    let generator = Arc::new(RecordingGenerator::default());
    let mut running = start(Some(generator.clone()), ResponsePolicy::Prefixed);

    running.session.submit(user("earlier remark")).await.unwrap();
    with_timeout(async {
        while running.updates.recv().await.unwrap().is_empty() {}
    })
    .await;

    let outcome = running.session.submit(user("@ai summarize")).await.unwrap();
    with_timeout(outcome.reply.unwrap()).await.unwrap();

    let calls = generator.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (prompt, history) = &calls[0];
    assert_eq!(prompt, "summarize");
    assert!(history.iter().all(|t| t.text != "@ai summarize"));
    assert!(history.iter().any(|t| t.text == "earlier remark"));
}

#[tokio::test]
async fn test_generator_failure_posts_fallback() {
    let generator = Arc::new(RecordingGenerator {
        fail: true,
        ..Default::default()
    });
    let running = start(Some(generator.clone()), ResponsePolicy::Always);

    let outcome = running.session.submit(user("anything")).await.unwrap();
    with_timeout(outcome.reply.unwrap()).await.unwrap();

    let records = running.remote.records();
    assert_eq!(records.len(), 2);
    assert!(records[1].is_ai());
    assert!(records[1].text().unwrap().contains("quota"));
    // One attempt per trigger
    assert_eq!(generator.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_disabled_gate_sends_single_message() {
    let running = start(None, ResponsePolicy::Never);

    let outcome = running.session.submit(user("just me")).await.unwrap();
    assert!(outcome.reply.is_none());
    assert_eq!(running.remote.len(), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_pending_reply() {
    let generator = Arc::new(RecordingGenerator::default());
    let running = start(Some(generator.clone()), ResponsePolicy::Always);

    let outcome = running.session.submit(user("question")).await.unwrap();
    running.session.shutdown();

    let joined = with_timeout(outcome.reply.unwrap()).await;
    assert!(joined.unwrap_err().is_cancelled());
    assert_eq!(running.remote.len(), 1);
    assert!(generator.calls.lock().unwrap().is_empty());
}
