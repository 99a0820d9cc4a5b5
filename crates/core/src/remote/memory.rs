//! In-process remote store.
//!
//! Behaves like a hosted message log (server timestamps, id dedupe, snapshot
//! notifications) and lets callers inject the failures a real network
//! produces: going offline, failing appends, and committing an append but
//! losing its acknowledgement.

use crate::chat::types::{ChatMessage, MessageId};
use crate::error::{Error, Result};
use crate::remote::{AppendAck, RemoteStore, SnapshotStream};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

struct Inner {
    /// Committed records in server timestamp order.
    records: Vec<ChatMessage>,
    last_timestamp: Option<DateTime<Utc>>,
    subscribers: Vec<mpsc::UnboundedSender<Result<Vec<ChatMessage>>>>,
    online: bool,
    always_fail: bool,
    fail_next: u32,
    lose_next_acks: u32,
    rejected: Vec<MessageId>,
    append_attempts: u32,
    latency: Option<Duration>,
}

impl Inner {
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn notify(&mut self) {
        let snapshot = self.records.clone();
        self.subscribers
            .retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
    }

    fn check_online(&self) -> Result<()> {
        if self.online {
            Ok(())
        } else {
            Err(Error::Network("remote store unreachable".to_string()))
        }
    }
}

/// Remote store living in process memory.
pub struct MemoryRemoteStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    /// Create an empty, reachable store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: Vec::new(),
                last_timestamp: None,
                subscribers: Vec::new(),
                online: true,
                always_fail: false,
                fail_next: 0,
                lose_next_acks: 0,
                rejected: Vec::new(),
                append_attempts: 0,
                latency: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the store reachable or not. Going offline breaks every open
    /// subscription with a network error.
    pub fn set_online(&self, online: bool) {
        let mut inner = self.lock();
        inner.online = online;
        if !online {
            for tx in inner.subscribers.drain(..) {
                let _ = tx.send(Err(Error::Network("connection lost".to_string())));
            }
        }
    }

    /// Fail every append until switched off.
    pub fn set_always_fail(&self, always_fail: bool) {
        self.lock().always_fail = always_fail;
    }

    /// Fail the next `count` appends.
    pub fn fail_next_appends(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Commit the next `count` appends but report a network error for them.
    pub fn lose_next_acks(&self, count: u32) {
        self.lock().lose_next_acks = count;
    }

    /// Permanently refuse appends of the message with `id`.
    pub fn reject_message(&self, id: &MessageId) {
        self.lock().rejected.push(id.clone());
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Number of append calls received so far.
    pub fn append_attempts(&self) -> u32 {
        self.lock().append_attempts
    }

    /// Committed records in order.
    pub fn records(&self) -> Vec<ChatMessage> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn update_record<F>(&self, id: &MessageId, f: F) -> Result<()>
    where
        F: FnOnce(&mut ChatMessage),
    {
        let mut inner = self.lock();
        inner.check_online()?;
        let record = inner
            .records
            .iter_mut()
            .find(|m| m.id() == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        f(record);
        inner.notify();
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn append(&self, message: &ChatMessage) -> Result<AppendAck> {
        self.simulate_latency().await;

        let mut inner = self.lock();
        inner.append_attempts += 1;
        inner.check_online()?;

        if inner.always_fail {
            return Err(Error::Network("append rejected".to_string()));
        }
        if inner.rejected.contains(message.id()) {
            return Err(Error::Validation(format!(
                "message {} refused by remote store",
                message.id()
            )));
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(Error::Network("append rejected".to_string()));
        }

        if let Some(existing) = inner.records.iter().find(|m| m.id() == message.id()) {
            debug!("Append of {} deduplicated", message.id());
            return Ok(AppendAck {
                id: existing.id().clone(),
                server_timestamp: existing.display_time(),
                duplicate: true,
            });
        }

        let server_timestamp = inner.next_timestamp();
        let mut record = message.clone();
        record.commit(server_timestamp);
        inner.records.push(record);
        inner.notify();

        if inner.lose_next_acks > 0 {
            inner.lose_next_acks -= 1;
            return Err(Error::Network("acknowledgement lost".to_string()));
        }

        Ok(AppendAck {
            id: message.id().clone(),
            server_timestamp,
            duplicate: false,
        })
    }

    async fn list(&self) -> Result<Vec<ChatMessage>> {
        self.simulate_latency().await;
        let inner = self.lock();
        inner.check_online()?;
        Ok(inner.records.clone())
    }

    async fn subscribe(&self) -> Result<SnapshotStream> {
        let mut inner = self.lock();
        inner.check_online()?;

        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, so this cannot fail.
        let _ = tx.send(Ok(inner.records.clone()));
        inner.subscribers.push(tx);
        Ok(rx)
    }

    async fn delete_all(&self) -> Result<usize> {
        self.simulate_latency().await;
        let mut inner = self.lock();
        inner.check_online()?;
        let count = inner.records.len();
        inner.records.clear();
        inner.notify();
        Ok(count)
    }

    async fn mark_read(&self, id: &MessageId) -> Result<()> {
        self.update_record(id, |m| m.mark_read(Utc::now()))
    }

    async fn mark_deleted(&self, id: &MessageId) -> Result<()> {
        self.update_record(id, |m| m.mark_deleted(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::{Draft, MessageStatus, Sender};

    fn message(text: &str) -> ChatMessage {
        ChatMessage::from_draft(Draft::text(Sender::new("alice", "Alice"), text))
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_timestamps() {
        let store = MemoryRemoteStore::new();
        let mut last = None;
        for i in 0..20 {
            let ack = store.append(&message(&format!("m{}", i))).await.unwrap();
            if let Some(prev) = last {
                assert!(ack.server_timestamp > prev);
            }
            last = Some(ack.server_timestamp);
        }

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 20);
        assert!(records.iter().all(|m| m.status() == MessageStatus::Sent));
    }

    #[tokio::test]
    async fn test_append_dedupes_on_id() {
        let store = MemoryRemoteStore::new();
        let msg = message("once");

        let first = store.append(&msg).await.unwrap();
        let second = store.append(&msg).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.server_timestamp, second.server_timestamp);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_ack_still_commits() {
        let store = MemoryRemoteStore::new();
        store.lose_next_acks(1);

        let msg = message("lost ack");
        assert!(store.append(&msg).await.is_err());
        assert_eq!(store.len(), 1);

        // Retrying the same id is safe
        assert!(store.append(&msg).await.unwrap().duplicate);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_gets_snapshots() {
        let store = MemoryRemoteStore::new();
        store.append(&message("before")).await.unwrap();

        let mut feed = store.subscribe().await.unwrap();
        assert_eq!(feed.recv().await.unwrap().unwrap().len(), 1);

        store.append(&message("after")).await.unwrap();
        let snapshot = feed.recv().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].text(), Some("after"));
    }

    #[tokio::test]
    async fn test_offline_breaks_subscription() {
        let store = MemoryRemoteStore::new();
        let mut feed = store.subscribe().await.unwrap();
        feed.recv().await.unwrap().unwrap();

        store.set_online(false);
        assert!(matches!(feed.recv().await, Some(Err(Error::Network(_)))));
        assert!(feed.recv().await.is_none());
        assert!(store.subscribe().await.is_err());
        assert!(store.append(&message("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_flags_and_delete_all() {
        let store = MemoryRemoteStore::new();
        let msg = message("flag me");
        store.append(&msg).await.unwrap();

        store.mark_read(msg.id()).await.unwrap();
        store.mark_deleted(msg.id()).await.unwrap();
        let record = &store.records()[0];
        assert!(record.is_read());
        assert!(record.is_deleted());

        assert!(matches!(
            store.mark_read(&MessageId::from("missing")).await,
            Err(Error::NotFound(_))
        ));

        assert_eq!(store.delete_all().await.unwrap(), 1);
        assert!(store.is_empty());
    }
}
