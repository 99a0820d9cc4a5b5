//! Offline-first chat delivery.
//!
//! Outgoing messages are appended to a shared remote log. While the network
//! is unavailable they wait in a durable local queue, and a bounded local
//! cache keeps the latest feed snapshot for offline display. Features:
//!
//! - Durable FIFO outgoing queue and bounded message cache via Sled
//! - Bounded retry with linear backoff and idempotent appends
//! - Queue drain on every reconnect
//! - Live feed with stale-cache fallback
//! - Optional AI responder posting replies into the same room
//! - Image upload before send

pub mod cache;
pub mod dispatcher;
pub mod feed;
pub mod queue;
pub mod responder;
pub mod session;
pub mod store;
pub mod types;
pub mod upload;

pub use cache::CacheStore;
pub use dispatcher::{ChatEvent, Dispatcher, DrainReport};
pub use feed::{LiveFeed, UpdateCallback};
pub use queue::QueueStore;
pub use responder::{
    ConversationTurn, GatedReply, HttpGenerator, ResponderGate, ResponseGenerator, ResponsePolicy,
    Role,
};
pub use session::{ChatSession, SessionDeps, SubmitOutcome};
pub use store::LocalStore;
pub use types::*;
pub use upload::{upload_with_retry, HttpUploader, ImageUploader, UploadedImage};
