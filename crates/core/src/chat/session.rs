//! Chat session: the context object tying the delivery core together.
//!
//! A session owns the dispatcher, the live feed and the responder gate for
//! one chat room. It is constructed once, passed around by handle and torn
//! down with [`ChatSession::shutdown`].

use crate::chat::dispatcher::Dispatcher;
use crate::chat::feed::LiveFeed;
use crate::chat::responder::ResponderGate;
use crate::chat::store::LocalStore;
use crate::chat::types::{merge_for_display, ChatMessage, Draft, MessageId, Sender};
use crate::chat::upload::{upload_with_retry, ImageUploader};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::net::ConnectivityMonitor;
use crate::remote::RemoteStore;
use crate::retry::RetryPolicy;
use crate::subscription::Subscription;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

/// Result of submitting a draft.
#[derive(Debug)]
pub struct SubmitOutcome {
    /// The user's message as returned by the dispatcher.
    pub message: ChatMessage,
    /// Background task posting the assistant reply, if one was triggered.
    pub reply: Option<JoinHandle<()>>,
}

/// External collaborators of a session.
pub struct SessionDeps {
    pub remote: Arc<dyn RemoteStore>,
    pub connectivity: ConnectivityMonitor,
    pub gate: ResponderGate,
    pub uploader: Option<Arc<dyn ImageUploader>>,
}

/// One chat room's delivery pipeline.
pub struct ChatSession {
    dispatcher: Arc<Dispatcher>,
    feed: Arc<LiveFeed>,
    gate: Arc<ResponderGate>,
    uploader: Option<Arc<dyn ImageUploader>>,
    connectivity: ConnectivityMonitor,
    retry: RetryPolicy,
    ai_sender: Sender,
    reply_delay: Duration,
    unavailable_delay: Duration,
    latest: Arc<Mutex<Vec<ChatMessage>>>,
    reconnect: Mutex<Option<Subscription>>,
    replies: Mutex<Vec<AbortHandle>>,
}

impl ChatSession {
    /// Wire up and start a session.
    ///
    /// Drains the queue if online, subscribes the live feed with `on_update`
    /// and resubscribes it on every reconnect.
    pub fn start<F>(config: &Config, store: &LocalStore, deps: SessionDeps, on_update: F) -> Self
    where
        F: Fn(Vec<ChatMessage>) + Send + Sync + 'static,
    {
        let dispatcher = Arc::new(Dispatcher::from_config(
            deps.remote.clone(),
            store,
            deps.connectivity.clone(),
            config,
        ));
        dispatcher.start();

        let latest = Arc::new(Mutex::new(Vec::new()));
        let feed = Arc::new(LiveFeed::new(deps.remote, store));
        {
            let latest = latest.clone();
            feed.subscribe(move |messages: Vec<ChatMessage>| {
                *latest.lock().unwrap_or_else(|e| e.into_inner()) = messages.clone();
                on_update(messages);
            });
        }

        let reconnect = {
            let feed = Arc::downgrade(&feed);
            let mut initial = true;
            deps.connectivity.subscribe(move |status| {
                // The feed was just subscribed; only later reconnects matter.
                let first = std::mem::take(&mut initial);
                let resubscribe = status.connected && !first;
                let feed = feed.clone();
                async move {
                    if !resubscribe {
                        return;
                    }
                    if let Some(feed) = feed.upgrade() {
                        info!("Back online, resubscribing live feed");
                        feed.resubscribe();
                    }
                }
            })
        };

        info!(
            "Chat session started (assistant {})",
            if deps.gate.is_available() {
                "available"
            } else {
                "unavailable"
            }
        );

        Self {
            dispatcher,
            feed,
            gate: Arc::new(deps.gate),
            uploader: deps.uploader,
            connectivity: deps.connectivity,
            retry: config.retry_policy(),
            ai_sender: config.responder.sender(),
            reply_delay: config.responder.reply_delay(),
            unavailable_delay: config.responder.unavailable_delay(),
            latest,
            reconnect: Mutex::new(Some(reconnect)),
            replies: Mutex::new(Vec::new()),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn feed(&self) -> &Arc<LiveFeed> {
        &self.feed
    }

    pub fn gate(&self) -> &ResponderGate {
        &self.gate
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Latest feed snapshot with queued messages overlaid, in display order.
    pub fn messages(&self) -> Result<Vec<ChatMessage>> {
        let feed = self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(merge_for_display(&feed, &self.dispatcher.pending_messages()?))
    }

    /// Send a user draft and, when the gate says so, schedule an assistant reply.
    ///
    /// The reply is only requested once the user's message is committed, so it
    /// always lands after it.
    pub async fn submit(&self, draft: Draft) -> Result<SubmitOutcome> {
        let trigger = (!draft.is_ai)
            .then(|| draft.text.clone())
            .flatten()
            .filter(|text| self.gate.should_respond(text));

        let message = self.dispatcher.send(draft).await?;

        let reply = match trigger {
            Some(prompt) if message.status().is_committed() => {
                Some(self.spawn_reply(prompt, message.id().clone()))
            }
            Some(_) => {
                debug!("Message {} queued, skipping assistant reply", message.id());
                None
            }
            None => None,
        };

        Ok(SubmitOutcome { message, reply })
    }

    fn spawn_reply(&self, prompt: String, trigger_id: MessageId) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let gate = self.gate.clone();
        let latest = self.latest.clone();
        let sender = self.ai_sender.clone();
        let reply_delay = self.reply_delay;
        let unavailable_delay = self.unavailable_delay;

        let task = tokio::spawn(async move {
            let text = if gate.is_available() {
                tokio::time::sleep(reply_delay).await;
                let history: Vec<ChatMessage> = latest
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .iter()
                    .filter(|m| m.id() != &trigger_id)
                    .cloned()
                    .collect();
                gate.reply(&prompt, &history).await.text
            } else {
                tokio::time::sleep(unavailable_delay).await;
                gate.unavailable_notice().to_string()
            };

            match dispatcher.send(Draft::ai_reply(sender, text)).await {
                Ok(reply) => debug!("Assistant replied to {} with {}", trigger_id, reply.id()),
                Err(e) => warn!("Failed to post assistant reply to {}: {}", trigger_id, e),
            }
        });

        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        replies.retain(|h| !h.is_finished());
        replies.push(task.abort_handle());
        task
    }

    /// Upload a local image and send it as a message.
    pub async fn send_image(
        &self,
        path: &Path,
        sender: Sender,
        caption: Option<String>,
    ) -> Result<ChatMessage> {
        let uploader = self
            .uploader
            .as_ref()
            .ok_or_else(|| Error::Config("image upload is not configured".to_string()))?;
        if !self.connectivity.is_connected() {
            return Err(Error::Network("cannot upload images while offline".to_string()));
        }

        let image = upload_with_retry(uploader.as_ref(), path, &self.retry).await?;
        let mut draft = Draft::image(sender, image.url);
        if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
            draft = draft.with_text(caption);
        }
        self.dispatcher.send(draft).await
    }

    /// Stop every background task: reconnect handling, pending replies,
    /// the live feed and the dispatcher's drain listener.
    pub fn shutdown(&self) {
        if let Some(reconnect) = self
            .reconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            reconnect.unsubscribe();
        }
        for reply in self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            reply.abort();
        }
        self.feed.unsubscribe();
        self.dispatcher.stop();
        debug!("Chat session shut down");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::dispatcher::ChatEvent;
    use crate::chat::responder::{ConversationTurn, ResponseGenerator, ResponsePolicy};
    use crate::chat::types::MessageStatus;
    use crate::remote::MemoryRemoteStore;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct EchoGenerator;

    #[async_trait]
    impl ResponseGenerator for EchoGenerator {
        async fn generate(&self, prompt: &str, _history: &[ConversationTurn]) -> Result<String> {
            Ok(format!("echo: {}", prompt))
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.retry.base_delay_ms = 1;
        config.responder.reply_delay_ms = 5;
        config.responder.unavailable_delay_ms = 5;
        config
    }

    fn start_session(
        gate: ResponderGate,
        connected: bool,
    ) -> (ChatSession, Arc<MemoryRemoteStore>, mpsc::UnboundedReceiver<Vec<ChatMessage>>) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let store = LocalStore::open_temporary(100).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let deps = SessionDeps {
            remote: remote.clone(),
            connectivity: ConnectivityMonitor::new(connected),
            gate,
            uploader: None,
        };
        let session = ChatSession::start(&test_config(), &store, deps, move |messages| {
            let _ = tx.send(messages);
        });
        (session, remote, rx)
    }

    fn alice(text: &str) -> Draft {
        Draft::text(Sender::new("alice", "Alice"), text)
    }

    #[tokio::test]
    async fn test_reply_follows_user_message() {
        let gate = ResponderGate::new(Some(Arc::new(EchoGenerator)), ResponsePolicy::Always);
        let (session, remote, _rx) = start_session(gate, true);

        let outcome = session.submit(alice("ai: hello")).await.unwrap();
        outcome.reply.unwrap().await.unwrap();

        let records = remote.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text(), Some("ai: hello"));
        assert!(records[1].is_ai());
        assert_eq!(records[1].sender_id(), "assistant");
        assert_eq!(records[1].text(), Some("echo: hello"));
    }

    #[tokio::test]
    async fn test_unavailable_notice() {
        let gate = ResponderGate::new(None, ResponsePolicy::Always);
        let (session, remote, _rx) = start_session(gate, true);

        let outcome = session.submit(alice("question")).await.unwrap();
        outcome.reply.unwrap().await.unwrap();

        let records = remote.records();
        assert!(records[1].is_ai());
        assert!(records[1].text().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_no_reply_when_policy_declines_or_offline() {
        let gate = ResponderGate::new(Some(Arc::new(EchoGenerator)), ResponsePolicy::Prefixed);
        let (session, _remote, _rx) = start_session(gate, true);
        assert!(session.submit(alice("just chatting")).await.unwrap().reply.is_none());

        let gate = ResponderGate::new(Some(Arc::new(EchoGenerator)), ResponsePolicy::Always);
        let (session, remote, _rx) = start_session(gate, false);
        let outcome = session.submit(alice("offline question")).await.unwrap();
        assert_eq!(outcome.message.status(), MessageStatus::Pending);
        assert!(outcome.reply.is_none());
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_messages_overlay_queue_on_feed() {
        let (session, _remote, mut rx) = start_session(ResponderGate::disabled(), false);
        let queued = session.submit(alice("waiting")).await.unwrap().message;

        // Feed delivers the (empty) remote snapshot
        rx.recv().await.unwrap();
        let shown = session.messages().unwrap();
        assert_eq!(shown, vec![queued]);
    }

    #[tokio::test]
    async fn test_reconnect_drains_and_resubscribes() {
        let (session, remote, mut rx) = start_session(ResponderGate::disabled(), true);
        assert!(rx.recv().await.unwrap().is_empty());

        remote.set_online(false);
        session.connectivity().set_connected(false);
        // Broken subscription falls back to the cache
        rx.recv().await.unwrap();

        session.submit(alice("queued while down")).await.unwrap();
        let mut events = session.dispatcher().subscribe_events();
        remote.set_online(true);
        session.connectivity().set_connected(true);

        loop {
            if let ChatEvent::PendingFlushed { remaining, .. } = events.recv().await.unwrap() {
                assert_eq!(remaining, 0);
                break;
            }
        }
        loop {
            let snapshot = rx.recv().await.unwrap();
            if snapshot.iter().any(|m| m.text() == Some("queued while down")) {
                break;
            }
        }
        assert_eq!(session.dispatcher().queue_len(), 0);
        session.shutdown();
        assert!(!session.feed().is_active());
    }

    #[tokio::test]
    async fn test_send_image_requires_uploader() {
        let (session, _remote, _rx) = start_session(ResponderGate::disabled(), true);
        let result = session
            .send_image(Path::new("/tmp/x.png"), Sender::new("alice", "Alice"), None)
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
