//! Durable outgoing message queue.
//!
//! Tree layout:
//! - `queue`: big-endian sequence -> QueueEntry (JSON), iteration order is FIFO
//! - `queue_index`: message_id -> sequence, for lookups and in-place replacement

use crate::chat::types::{ChatMessage, MessageId, QueueEntry};
use crate::error::{Error, Result};
use sled::transaction::{TransactionError, TransactionResult};
use sled::{Db, IVec, Transactional, Tree};

/// Sled-backed FIFO of messages waiting for a successful remote append.
#[derive(Clone)]
pub struct QueueStore {
    db: Db,
    entries: Tree,
    index: Tree,
}

impl QueueStore {
    pub(crate) fn open(db: &Db) -> Result<Self> {
        Ok(Self {
            db: db.clone(),
            entries: db
                .open_tree("queue")
                .map_err(|e| Error::Storage(format!("failed to open queue: {}", e)))?,
            index: db
                .open_tree("queue_index")
                .map_err(|e| Error::Storage(format!("failed to open queue index: {}", e)))?,
        })
    }

    /// Add a message to the tail of the queue.
    ///
    /// A message whose id is already queued is replaced in place and keeps its
    /// position, retry count and queue time.
    pub fn enqueue(&self, message: &ChatMessage) -> Result<QueueEntry> {
        let entry = match self.get(message.id())? {
            Some(mut existing) => {
                existing.message = message.clone();
                existing
            }
            None => QueueEntry::new(message.clone()),
        };
        self.put(&entry)?;
        Ok(entry)
    }

    /// Overwrite the stored entry with the same message id (or append it).
    pub fn update(&self, entry: &QueueEntry) -> Result<()> {
        self.put(entry)
    }

    fn put(&self, entry: &QueueEntry) -> Result<()> {
        let data = serde_json::to_vec(entry)
            .map_err(|e| Error::Storage(format!("failed to serialize queue entry: {}", e)))?;
        let fresh_key = self.db.generate_id()?.to_be_bytes();
        let id = entry.id().as_str().as_bytes();

        let result: TransactionResult<()> =
            (&self.entries, &self.index).transaction(|(entries, index)| {
                let key = match index.get(id)? {
                    Some(existing) => existing,
                    None => {
                        index.insert(id, &fresh_key[..])?;
                        IVec::from(&fresh_key[..])
                    }
                };
                entries.insert(key, data.clone())?;
                Ok(())
            });

        transaction_result(result, "failed to queue message")
    }

    /// All queued entries, oldest first.
    pub fn list_all(&self) -> Result<Vec<QueueEntry>> {
        let mut entries = Vec::new();
        for item in self.entries.iter() {
            let (_, data) =
                item.map_err(|e| Error::Storage(format!("failed to scan queue: {}", e)))?;
            let entry: QueueEntry = serde_json::from_slice(&data).map_err(|e| {
                Error::Storage(format!("failed to deserialize queue entry: {}", e))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Get a queued entry by message id.
    pub fn get(&self, id: &MessageId) -> Result<Option<QueueEntry>> {
        let key = match self.index.get(id.as_str().as_bytes())? {
            Some(key) => key,
            None => return Ok(None),
        };

        match self.entries.get(&key)? {
            Some(data) => {
                let entry: QueueEntry = serde_json::from_slice(&data).map_err(|e| {
                    Error::Storage(format!("failed to deserialize queue entry: {}", e))
                })?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Remove an entry. Returns whether it was present.
    pub fn remove(&self, id: &MessageId) -> Result<bool> {
        let id = id.as_str().as_bytes();
        let result: TransactionResult<bool> =
            (&self.entries, &self.index).transaction(|(entries, index)| {
                match index.remove(id)? {
                    Some(key) => {
                        entries.remove(key)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            });

        match result {
            Ok(removed) => Ok(removed),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(format!(
                "failed to remove queued message: {}",
                e
            ))),
            Err(TransactionError::Abort(())) => Err(Error::Storage(
                "queue removal aborted".to_string(),
            )),
        }
    }

    /// Drop every queued entry.
    pub fn clear(&self) -> Result<()> {
        self.entries
            .clear()
            .map_err(|e| Error::Storage(format!("failed to clear queue: {}", e)))?;
        self.index
            .clear()
            .map_err(|e| Error::Storage(format!("failed to clear queue index: {}", e)))?;
        Ok(())
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flush queue trees to disk.
    pub fn flush(&self) -> Result<()> {
        self.entries.flush()?;
        self.index.flush()?;
        Ok(())
    }
}

fn transaction_result(result: TransactionResult<()>, what: &str) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(TransactionError::Storage(e)) => Err(Error::Storage(format!("{}: {}", what, e))),
        Err(TransactionError::Abort(())) => Err(Error::Storage(format!("{}: aborted", what))),
    }
}
