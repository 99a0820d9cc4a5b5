//! Core data types for the chat system.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Unique identifier for a chat message.
///
/// Generated on the client when the message is created and kept by the remote
/// store as the record id, so retries of the same message dedupe on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a new random message ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Delivery status of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Created locally, not yet committed (possibly queued while offline).
    #[default]
    Pending,
    /// Committed to the remote store.
    Sent,
    /// Every attempt failed; waiting in the queue for the next drain.
    Failed,
    /// Seen by the remote side.
    Delivered,
    /// Read by a recipient.
    Read,
}

impl MessageStatus {
    /// Get a human-readable string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    /// Whether the remote store has accepted the message.
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            MessageStatus::Sent | MessageStatus::Delivered | MessageStatus::Read
        )
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Stable sender id.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl Sender {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// User-authored content that has not been turned into a message yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub sender: Sender,
    pub is_ai: bool,
}

impl Draft {
    /// A plain text draft.
    pub fn text(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_url: None,
            sender,
            is_ai: false,
        }
    }

    /// An image draft referencing an already uploaded asset.
    pub fn image(sender: Sender, image_url: impl Into<String>) -> Self {
        Self {
            text: None,
            image_url: Some(image_url.into()),
            sender,
            is_ai: false,
        }
    }

    /// A generated reply authored by the assistant.
    pub fn ai_reply(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            is_ai: true,
            ..Self::text(sender, text)
        }
    }

    /// Attach a caption to an image draft (or an image to a text draft).
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Reject drafts that carry neither text nor an image.
    pub fn validate(&self) -> Result<()> {
        let has_text = self.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_image = self
            .image_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());

        if !has_text && !has_image {
            return Err(Error::Validation(
                "message needs text or an image".to_string(),
            ));
        }
        if let Some(text) = &self.text {
            if text.len() > ChatMessage::MAX_TEXT_LENGTH {
                return Err(Error::Validation(format!(
                    "message text exceeds maximum length of {} bytes",
                    ChatMessage::MAX_TEXT_LENGTH
                )));
            }
        }
        if self.sender.id.is_empty() {
            return Err(Error::Validation("sender id cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// A single chat message.
///
/// Only the delivery bookkeeping (`status`, read/deleted flags and the server
/// timestamp) changes after creation; everything else is fixed at
/// construction and exposed read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    sender_id: String,
    sender_name: String,
    #[serde(rename = "isAI", default)]
    is_ai: bool,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    status: MessageStatus,
    #[serde(default)]
    is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Maximum allowed text length (64KB).
    pub const MAX_TEXT_LENGTH: usize = 64 * 1024;

    /// Build a pending message from a validated draft, stamped now.
    pub fn from_draft(draft: Draft) -> Self {
        Self::from_draft_at(draft, Utc::now())
    }

    /// Build a pending message from a draft with an explicit creation time.
    pub fn from_draft_at(draft: Draft, created_at: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            text: draft.text.filter(|t| !t.trim().is_empty()),
            image_url: draft.image_url.filter(|u| !u.trim().is_empty()),
            sender_id: draft.sender.id,
            sender_name: draft.sender.name,
            is_ai: draft.is_ai,
            created_at,
            server_timestamp: None,
            status: MessageStatus::Pending,
            is_read: false,
            read_at: None,
            deleted: false,
            deleted_at: None,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    pub fn is_ai(&self) -> bool {
        self.is_ai
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn server_timestamp(&self) -> Option<DateTime<Utc>> {
        self.server_timestamp
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn is_read(&self) -> bool {
        self.is_read
    }

    pub fn read_at(&self) -> Option<DateTime<Utc>> {
        self.read_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Timestamp used for display ordering: commit time if known, else creation time.
    pub fn display_time(&self) -> DateTime<Utc> {
        self.server_timestamp.unwrap_or(self.created_at)
    }

    /// Record the remote commit. Only the first commit timestamp sticks.
    pub fn commit(&mut self, server_timestamp: DateTime<Utc>) {
        if self.server_timestamp.is_none() {
            self.server_timestamp = Some(server_timestamp);
        }
        self.mark_sent();
    }

    /// Mark the message as sent.
    pub fn mark_sent(&mut self) {
        if matches!(self.status, MessageStatus::Pending | MessageStatus::Failed) {
            self.status = MessageStatus::Sent;
        }
    }

    /// Put a failed message back in flight for another attempt.
    pub fn mark_pending(&mut self) {
        if self.status == MessageStatus::Failed {
            self.status = MessageStatus::Pending;
        }
    }

    /// Mark the message as failed. Committed messages are left alone.
    pub fn mark_failed(&mut self) {
        if !self.status.is_committed() {
            self.status = MessageStatus::Failed;
        }
    }

    /// Mark the message as delivered.
    pub fn mark_delivered(&mut self) {
        if self.status == MessageStatus::Sent {
            self.status = MessageStatus::Delivered;
        }
    }

    /// Mark the message as read.
    pub fn mark_read(&mut self, at: DateTime<Utc>) {
        if !self.is_read {
            self.is_read = true;
            self.read_at = Some(at);
        }
        if matches!(self.status, MessageStatus::Sent | MessageStatus::Delivered) {
            self.status = MessageStatus::Read;
        }
    }

    /// Soft-delete the message.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        if !self.deleted {
            self.deleted = true;
            self.deleted_at = Some(at);
        }
    }

    /// Short single-line preview of the message content.
    pub fn preview(&self) -> String {
        match (&self.text, &self.image_url) {
            (Some(text), _) => truncate_preview(text),
            (None, Some(_)) => "[image]".to_string(),
            (None, None) => String::new(),
        }
    }
}

/// A queued message awaiting a successful remote append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub message: ChatMessage,
    /// Failed append attempts since the message was queued.
    #[serde(default)]
    pub retry_count: u32,
    pub queued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(message: ChatMessage) -> Self {
        Self {
            message,
            retry_count: 0,
            queued_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &MessageId {
        self.message.id()
    }
}

/// Sort messages into display order (commit time, else creation time).
///
/// The sort is stable, so messages with equal timestamps keep their relative order.
pub fn sort_for_display(messages: &mut [ChatMessage]) {
    messages.sort_by_key(|m| m.display_time());
}

/// Overlay locally queued messages onto the authoritative feed.
///
/// Queued messages whose id already appears in the feed are dropped: the
/// committed record supersedes the optimistic one.
pub fn merge_for_display(feed: &[ChatMessage], pending: &[ChatMessage]) -> Vec<ChatMessage> {
    let committed: HashSet<&MessageId> = feed.iter().map(|m| m.id()).collect();
    let mut merged = feed.to_vec();
    let mut seen = HashSet::new();
    for message in pending {
        if !committed.contains(message.id()) && seen.insert(message.id().clone()) {
            merged.push(message.clone());
        }
    }
    sort_for_display(&mut merged);
    merged
}

fn truncate_preview(text: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 50;
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > MAX_PREVIEW_CHARS {
        let cut: String = line.chars().take(MAX_PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}
