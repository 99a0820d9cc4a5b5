//! Message dispatcher: the only writer of the outgoing queue.
//!
//! Sends go to the remote store when online, with bounded retry, once any
//! earlier queued messages have gone out. Offline sends and exhausted sends
//! land in the queue, which is drained in FIFO order whenever connectivity
//! returns.
//!
//! Lock order is `send_lock` then `queue_lock`. Every send, drain and resend
//! holds `send_lock`, so appends and queue positions follow call order; `queue_lock` serializes every
//! read-modify-write of the queue.

use crate::chat::cache::CacheStore;
use crate::chat::queue::QueueStore;
use crate::chat::store::LocalStore;
use crate::chat::types::{ChatMessage, Draft, MessageId, QueueEntry};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::net::ConnectivityMonitor;
use crate::remote::RemoteStore;
use crate::retry::{with_timeout, RetryPolicy};
use crate::subscription::Subscription;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by dispatcher operations for UI notification.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Message committed to the remote store.
    MessageSent { message: ChatMessage },
    /// Message stored locally while offline.
    MessageQueued { message: ChatMessage },
    /// Delivery failed; the message waits in the queue.
    MessageFailed { message_id: MessageId, error: String },
    /// Queued messages were delivered after connectivity returned.
    PendingFlushed { count: usize, remaining: usize },
    /// Message marked as read.
    MessageRead { message_id: MessageId },
    /// Message soft-deleted.
    MessageDeleted { message_id: MessageId },
    /// Remote records, queue and cache were cleared.
    Cleared { removed: usize },
}

/// Outcome of one queue drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries delivered and removed from the queue.
    pub sent: usize,
    /// Entries still queued afterwards.
    pub remaining: usize,
}

/// Delivers outgoing messages to the remote store.
pub struct Dispatcher {
    remote: Arc<dyn RemoteStore>,
    queue: QueueStore,
    cache: CacheStore,
    connectivity: ConnectivityMonitor,
    retry: RetryPolicy,
    append_timeout: Duration,
    send_lock: AsyncMutex<()>,
    queue_lock: AsyncMutex<()>,
    events: broadcast::Sender<ChatEvent>,
    listener: Mutex<Option<Subscription>>,
}

impl Dispatcher {
    /// Create a dispatcher with the default retry policy and append timeout.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: &LocalStore,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            remote,
            queue: store.queue(),
            cache: store.cache(),
            connectivity,
            retry: RetryPolicy::default(),
            append_timeout: Duration::from_secs(30),
            send_lock: AsyncMutex::new(()),
            queue_lock: AsyncMutex::new(()),
            events,
            listener: Mutex::new(None),
        }
    }

    /// Create a dispatcher using the retry and timeout settings of `config`.
    pub fn from_config(
        remote: Arc<dyn RemoteStore>,
        store: &LocalStore,
        connectivity: ConnectivityMonitor,
        config: &Config,
    ) -> Self {
        Self::new(remote, store, connectivity)
            .with_retry(config.retry_policy())
            .with_append_timeout(config.append_timeout())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_append_timeout(mut self, append_timeout: Duration) -> Self {
        self.append_timeout = append_timeout;
        self
    }

    /// Receive dispatcher events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ChatEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    // ==================== Sending ====================

    /// Send a draft.
    ///
    /// Offline, the message is queued and returned as `pending` without a
    /// network attempt. Online, earlier queued messages are drained first; if
    /// the drain stalls the new message is queued behind them. Otherwise it is
    /// appended with bounded retry, and when every attempt fails it is queued
    /// as `failed` and returned inside [`Error::SendFailed`].
    pub async fn send(&self, draft: Draft) -> Result<ChatMessage> {
        draft.validate()?;
        let message = ChatMessage::from_draft(draft);

        let _order = self.send_lock.lock().await;
        if !self.connectivity.is_connected() {
            info!("Offline, queueing message {}", message.id());
            return self.queue_pending(message).await;
        }

        if !self.queue.is_empty() {
            let (_, stalled) = self.drain_locked().await?;
            if stalled {
                info!("Queue still blocked, queueing message {} behind it", message.id());
                return self.queue_pending(message).await;
            }
        }

        self.send_with_retry(message, 0).await
    }

    /// Put a message at the tail of the queue. Caller holds `send_lock`.
    async fn queue_pending(&self, message: ChatMessage) -> Result<ChatMessage> {
        {
            let _queue = self.queue_lock.lock().await;
            self.queue.enqueue(&message)?;
        }
        self.emit(ChatEvent::MessageQueued {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Append with the retry policy. Caller holds `send_lock`.
    async fn send_with_retry(
        &self,
        mut message: ChatMessage,
        prior_attempts: u32,
    ) -> Result<ChatMessage> {
        let msg = &message;
        let result = self
            .retry
            .run("send", move |attempt| {
                debug!("Appending message {} (attempt {})", msg.id(), attempt);
                self.append_once(msg)
            })
            .await;

        match result {
            Ok(server_timestamp) => {
                self.apply_commit(&mut message, server_timestamp);
                {
                    let _queue = self.queue_lock.lock().await;
                    self.queue.remove(message.id())?;
                }
                self.on_sent(&message);
                Ok(message)
            }
            Err(failure) => {
                message.mark_failed();
                {
                    let _queue = self.queue_lock.lock().await;
                    let mut entry = self
                        .queue
                        .get(message.id())?
                        .unwrap_or_else(|| QueueEntry::new(message.clone()));
                    entry.message = message.clone();
                    entry.retry_count = prior_attempts + failure.attempts;
                    self.queue.update(&entry)?;
                }

                error!(
                    "Message {} failed after {} attempts, queued: {}",
                    message.id(),
                    failure.attempts,
                    failure.error
                );
                self.emit(ChatEvent::MessageFailed {
                    message_id: message.id().clone(),
                    error: failure.error.to_string(),
                });
                Err(Error::SendFailed {
                    message: Box::new(message),
                    attempts: failure.attempts,
                    source: Box::new(failure.error),
                })
            }
        }
    }

    /// One bounded append. `Ok(None)` means the store already held the id
    /// without reporting its timestamp.
    async fn append_once(&self, message: &ChatMessage) -> Result<Option<DateTime<Utc>>> {
        match with_timeout(self.append_timeout, self.remote.append(message)).await {
            Ok(ack) => {
                if ack.duplicate {
                    debug!("Message {} was already committed", message.id());
                }
                Ok(Some(ack.server_timestamp))
            }
            Err(Error::AlreadyExists(_)) => {
                debug!("Message {} already exists remotely", message.id());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn apply_commit(&self, message: &mut ChatMessage, server_timestamp: Option<DateTime<Utc>>) {
        match server_timestamp {
            Some(ts) => message.commit(ts),
            None => message.mark_sent(),
        }
    }

    fn on_sent(&self, message: &ChatMessage) {
        if let Err(e) = self.cache.append(message) {
            warn!("Failed to mirror message {} to cache: {}", message.id(), e);
        }
        self.emit(ChatEvent::MessageSent {
            message: message.clone(),
        });
    }

    // ==================== Offline Queue ====================

    /// Deliver queued messages in FIFO order, one attempt each.
    ///
    /// A transient failure stops the drain so later messages never overtake
    /// an earlier one; the failed entry and everything after it stay queued.
    /// An entry the remote refuses outright is marked `failed` and skipped.
    /// A no-op when the queue is empty or connectivity is down.
    pub async fn drain_queue(&self) -> Result<DrainReport> {
        let _order = self.send_lock.lock().await;
        let (report, _) = self.drain_locked().await?;
        Ok(report)
    }

    /// Drain with `send_lock` already held. The flag is true when deliverable
    /// entries were left behind (offline or a transient failure).
    async fn drain_locked(&self) -> Result<(DrainReport, bool)> {
        let _queue = self.queue_lock.lock().await;

        let pending = self.queue.list_all()?;
        if pending.is_empty() {
            return Ok((DrainReport::default(), false));
        }
        if !self.connectivity.is_connected() {
            debug!("Offline, leaving {} queued messages", pending.len());
            let report = DrainReport {
                sent: 0,
                remaining: pending.len(),
            };
            return Ok((report, true));
        }

        let mut sent = 0;
        let mut stalled = false;
        for mut entry in pending {
            entry.message.mark_pending();

            match self.append_once(&entry.message).await {
                Ok(server_timestamp) => {
                    self.apply_commit(&mut entry.message, server_timestamp);
                    self.queue.remove(entry.id())?;
                    self.on_sent(&entry.message);
                    sent += 1;
                }
                Err(e) => {
                    entry.retry_count += 1;
                    entry.message.mark_failed();
                    self.queue.update(&entry)?;
                    self.emit(ChatEvent::MessageFailed {
                        message_id: entry.id().clone(),
                        error: e.to_string(),
                    });

                    if e.is_transient() {
                        warn!("Failed to flush queued message {}: {}", entry.id(), e);
                        stalled = true;
                        break;
                    }
                    error!("Queued message {} refused, skipping: {}", entry.id(), e);
                }
            }
        }

        let remaining = self.queue.len();
        if sent > 0 {
            info!("Flushed {} queued messages, {} remaining", sent, remaining);
            self.emit(ChatEvent::PendingFlushed {
                count: sent,
                remaining,
            });
        }
        Ok((DrainReport { sent, remaining }, stalled))
    }

    /// Retry one queued message through the full retry loop.
    pub async fn resend(&self, id: &MessageId) -> Result<ChatMessage> {
        let _order = self.send_lock.lock().await;

        let entry = {
            let _queue = self.queue_lock.lock().await;
            let mut entry = self
                .queue
                .get(id)?
                .ok_or_else(|| Error::NotFound(format!("queued message {}", id)))?;
            entry.message.mark_pending();
            self.queue.update(&entry)?;
            entry
        };

        info!("Resending message {}", id);
        self.send_with_retry(entry.message, entry.retry_count).await
    }

    /// Queued messages, oldest first, for display merging.
    pub fn pending_messages(&self) -> Result<Vec<ChatMessage>> {
        Ok(self
            .queue
            .list_all()?
            .into_iter()
            .map(|entry| entry.message)
            .collect())
    }

    /// Number of queued messages.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // ==================== Message Flags ====================

    /// Mark a committed message as read.
    pub async fn mark_as_read(&self, id: &MessageId) -> Result<()> {
        with_timeout(self.append_timeout, self.remote.mark_read(id)).await?;
        self.emit(ChatEvent::MessageRead {
            message_id: id.clone(),
        });
        Ok(())
    }

    /// Soft-delete a committed message.
    pub async fn delete_message(&self, id: &MessageId) -> Result<()> {
        with_timeout(self.append_timeout, self.remote.mark_deleted(id)).await?;
        info!("Deleted message {}", id);
        self.emit(ChatEvent::MessageDeleted {
            message_id: id.clone(),
        });
        Ok(())
    }

    /// Unread, non-deleted messages not authored by `user_id`.
    ///
    /// Counts from the cache when the remote store is unreachable.
    pub async fn unread_count(&self, user_id: &str) -> Result<usize> {
        let messages = match with_timeout(self.append_timeout, self.remote.list()).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Counting unread messages from cache: {}", e);
                self.cache.read()?
            }
        };

        Ok(messages
            .iter()
            .filter(|m| !m.is_read() && !m.is_deleted() && m.sender_id() != user_id)
            .count())
    }

    /// Delete every remote record and clear the queue and the cache.
    ///
    /// Every step is attempted; the first failure is returned. Returns the
    /// number of remote records removed.
    pub async fn clear_all(&self) -> Result<usize> {
        let _queue = self.queue_lock.lock().await;

        let remote = with_timeout(self.append_timeout, self.remote.delete_all()).await;
        let queue = self.queue.clear();
        let cache = self.cache.clear();

        for (what, err) in [
            ("remote records", remote.as_ref().err()),
            ("queue", queue.as_ref().err()),
            ("cache", cache.as_ref().err()),
        ] {
            if let Some(err) = err {
                error!("Failed to clear {}: {}", what, err);
            }
        }

        let removed = remote?;
        queue?;
        cache?;

        info!("Cleared {} messages", removed);
        self.emit(ChatEvent::Cleared { removed });
        Ok(removed)
    }

    // ==================== Lifecycle ====================

    /// Drain the queue now if online and again on every later reconnect.
    pub fn start(self: &Arc<Self>) {
        let dispatcher = Arc::downgrade(self);
        let subscription = self.connectivity.subscribe(move |status| {
            let dispatcher = dispatcher.clone();
            async move {
                if !status.connected {
                    return;
                }
                let Some(dispatcher) = dispatcher.upgrade() else {
                    return;
                };
                if let Err(e) = dispatcher.drain_queue().await {
                    warn!("Queue drain failed: {}", e);
                }
            }
        });

        let previous = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(subscription);
        if previous.is_some() {
            debug!("Replaced existing connectivity listener");
        }
    }

    /// Stop reacting to connectivity changes.
    pub fn stop(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.unsubscribe();
        }
    }

    /// Whether the connectivity listener is running.
    pub fn is_running(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|l| l.is_active())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
