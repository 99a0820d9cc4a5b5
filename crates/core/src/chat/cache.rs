//! Bounded snapshot of recent messages for offline display.

use crate::chat::types::{sort_for_display, ChatMessage};
use crate::error::{Error, Result};
use sled::{Db, Tree};
use std::sync::{Arc, Mutex};

const SNAPSHOT_KEY: &[u8] = b"snapshot";

/// Sled-backed cache holding the newest `capacity` messages as one JSON snapshot.
#[derive(Clone)]
pub struct CacheStore {
    tree: Tree,
    capacity: usize,
    /// Serializes read-modify-write of the snapshot.
    write_lock: Arc<Mutex<()>>,
}

impl CacheStore {
    pub(crate) fn open(db: &Db, capacity: usize) -> Result<Self> {
        Ok(Self {
            tree: db
                .open_tree("cache")
                .map_err(|e| Error::Storage(format!("failed to open cache: {}", e)))?,
            capacity: capacity.max(1),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Maximum number of messages kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overwrite the snapshot with `messages` (display order), keeping the newest `capacity`.
    pub fn replace(&self, messages: &[ChatMessage]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write(messages)
    }

    /// Insert or update a single message, then trim.
    pub fn append(&self, message: &ChatMessage) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut messages = self.read()?;
        match messages.iter_mut().find(|m| m.id() == message.id()) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        sort_for_display(&mut messages);
        self.write(&messages)
    }

    fn write(&self, messages: &[ChatMessage]) -> Result<()> {
        let start = messages.len().saturating_sub(self.capacity);
        let data = serde_json::to_vec(&messages[start..])
            .map_err(|e| Error::Storage(format!("failed to serialize cache: {}", e)))?;
        self.tree
            .insert(SNAPSHOT_KEY, data)
            .map_err(|e| Error::Storage(format!("failed to write cache: {}", e)))?;
        Ok(())
    }

    /// The cached snapshot, oldest first. Empty if nothing was cached yet.
    pub fn read(&self) -> Result<Vec<ChatMessage>> {
        match self.tree.get(SNAPSHOT_KEY) {
            Ok(Some(data)) => serde_json::from_slice(&data)
                .map_err(|e| Error::Storage(format!("failed to deserialize cache: {}", e))),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(Error::Storage(format!("failed to read cache: {}", e))),
        }
    }

    /// Remove the snapshot.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.tree
            .remove(SNAPSHOT_KEY)
            .map_err(|e| Error::Storage(format!("failed to clear cache: {}", e)))?;
        Ok(())
    }

    /// Flush the cache tree to disk.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::store::LocalStore;
    use crate::chat::types::{Draft, MessageStatus, Sender};
    use chrono::{Duration, Utc};

    fn messages(count: usize) -> Vec<ChatMessage> {
        let base = Utc::now();
        (0..count)
            .map(|i| {
                let mut m = ChatMessage::from_draft_at(
                    Draft::text(Sender::new("us", "Us"), format!("m{}", i)),
                    base + Duration::milliseconds(i as i64),
                );
                m.commit(base + Duration::milliseconds(i as i64));
                m
            })
            .collect()
    }

    #[test]
    fn test_replace_keeps_newest() {
        let store = LocalStore::open_temporary(10).unwrap();
        let cache = store.cache();

        cache.replace(&messages(15)).unwrap();

        let cached = cache.read().unwrap();
        assert_eq!(cached.len(), 10);
        assert_eq!(cached[0].text(), Some("m5"));
        assert_eq!(cached[9].text(), Some("m14"));
    }

    #[test]
    fn test_replace_overwrites_wholesale() {
        let store = LocalStore::open_temporary(10).unwrap();
        let cache = store.cache();

        cache.replace(&messages(5)).unwrap();
        cache.replace(&messages(2)).unwrap();
        assert_eq!(cache.read().unwrap().len(), 2);
    }

    #[test]
    fn test_append_upserts_by_id() {
        let store = LocalStore::open_temporary(3).unwrap();
        let cache = store.cache();

        let mut msg = ChatMessage::from_draft(Draft::text(Sender::new("us", "Us"), "hi"));
        cache.append(&msg).unwrap();
        msg.commit(Utc::now());
        cache.append(&msg).unwrap();

        let cached = cache.read().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].status(), MessageStatus::Sent);

        for m in messages(3) {
            cache.append(&m).unwrap();
        }
        assert_eq!(cache.read().unwrap().len(), 3);
    }

    #[test]
    fn test_read_empty_and_clear() {
        let store = LocalStore::open_temporary(10).unwrap();
        let cache = store.cache();

        assert!(cache.read().unwrap().is_empty());
        cache.replace(&messages(3)).unwrap();
        cache.clear().unwrap();
        assert!(cache.read().unwrap().is_empty());
    }
}
