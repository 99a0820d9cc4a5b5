//! Local durable storage using the Sled embedded database.

use crate::chat::cache::CacheStore;
use crate::chat::queue::QueueStore;
use crate::error::{Error, Result};
use sled::Db;
use std::path::Path;

/// Owner of the on-disk database backing the queue and the cache.
///
/// Database structure:
/// - `queue`: sequence -> QueueEntry (JSON), FIFO outgoing queue
/// - `queue_index`: message_id -> sequence
/// - `cache`: single snapshot of the most recent messages (JSON)
pub struct LocalStore {
    db: Db,
    queue: QueueStore,
    cache: CacheStore,
}

impl LocalStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path, cache_capacity: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("failed to open message database: {}", e)))?;
        Self::from_db(db, cache_capacity)
    }

    /// Open a throwaway database that is deleted on drop.
    pub fn open_temporary(cache_capacity: usize) -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| Error::Storage(format!("failed to open temporary database: {}", e)))?;
        Self::from_db(db, cache_capacity)
    }

    fn from_db(db: Db, cache_capacity: usize) -> Result<Self> {
        Ok(Self {
            queue: QueueStore::open(&db)?,
            cache: CacheStore::open(&db, cache_capacity)?,
            db,
        })
    }

    /// Handle to the outgoing queue.
    pub fn queue(&self) -> QueueStore {
        self.queue.clone()
    }

    /// Handle to the offline cache.
    pub fn cache(&self) -> CacheStore {
        self.cache.clone()
    }

    /// Flush the database to disk.
    pub fn flush(&self) -> Result<()> {
        self.queue.flush()?;
        self.cache.flush()?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::{ChatMessage, Draft, Sender};
    use tempfile::TempDir;

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("courier.db");
        let msg = ChatMessage::from_draft(Draft::text(Sender::new("us", "Us"), "persist me"));

        {
            let store = LocalStore::open(&path, 10).unwrap();
            store.queue().enqueue(&msg).unwrap();
            store.cache().append(&msg).unwrap();
            store.flush().unwrap();
        }

        let store = LocalStore::open(&path, 10).unwrap();
        let queued = store.queue().list_all().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].message, msg);
        assert_eq!(store.cache().read().unwrap(), vec![msg]);
    }

    #[test]
    fn test_fifo_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("courier.db");
        let sender = Sender::new("us", "Us");

        {
            let store = LocalStore::open(&path, 10).unwrap();
            store
                .queue()
                .enqueue(&ChatMessage::from_draft(Draft::text(sender.clone(), "a")))
                .unwrap();
            store.flush().unwrap();
        }

        let store = LocalStore::open(&path, 10).unwrap();
        store
            .queue()
            .enqueue(&ChatMessage::from_draft(Draft::text(sender, "b")))
            .unwrap();

        let texts: Vec<_> = store
            .queue()
            .list_all()
            .unwrap()
            .into_iter()
            .map(|e| e.message.text().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
    }
}
