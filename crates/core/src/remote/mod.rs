//! Remote ordered message store.
//!
//! The remote store is the single source of truth for committed messages and
//! their order. Implementations keep the client-supplied message id as the
//! record id, which makes appends safe to retry.

pub mod memory;

use crate::chat::types::{ChatMessage, MessageId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub use memory::MemoryRemoteStore;

/// Acknowledgement of a committed append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendAck {
    /// Record id (equal to the client-supplied message id).
    pub id: MessageId,
    /// Commit timestamp assigned by the store.
    pub server_timestamp: DateTime<Utc>,
    /// The id was already committed by an earlier attempt.
    pub duplicate: bool,
}

/// Stream of full ordered result sets, one per change notification.
///
/// An `Err` item means the subscription broke; nothing follows it.
pub type SnapshotStream = mpsc::UnboundedReceiver<Result<Vec<ChatMessage>>>;

/// Operations the delivery core needs from the shared message log.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Commit a message. Appending an id that is already committed must not
    /// create a second record: return the existing ack (`duplicate = true`)
    /// or [`crate::Error::AlreadyExists`].
    async fn append(&self, message: &ChatMessage) -> Result<AppendAck>;

    /// All committed messages ordered by server timestamp ascending.
    async fn list(&self) -> Result<Vec<ChatMessage>>;

    /// Open a standing query. The current result set is delivered first.
    async fn subscribe(&self) -> Result<SnapshotStream>;

    /// Delete every record. Returns the number removed.
    async fn delete_all(&self) -> Result<usize>;

    /// Set the read flag on a committed message.
    async fn mark_read(&self, id: &MessageId) -> Result<()>;

    /// Soft-delete a committed message.
    async fn mark_deleted(&self, id: &MessageId) -> Result<()>;
}
