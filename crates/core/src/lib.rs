//! Courier Core Library
//!
//! This crate provides the offline-first delivery core for a shared chat
//! room, including:
//! - Durable outgoing queue and offline message cache
//! - Connectivity monitoring
//! - Message dispatch with bounded retry
//! - Live feed subscription
//! - AI responder gate
//! - Configuration management
//!
//! It is used by the `courier` command-line front end.

pub mod chat;
pub mod config;
pub mod error;
pub mod net;
pub mod platform;
pub mod remote;
pub mod retry;
pub mod subscription;

// Re-export commonly used types
pub use chat::{
    ChatEvent, ChatMessage, ChatSession, Dispatcher, Draft, LiveFeed, LocalStore, MessageId,
    MessageStatus, ResponderGate, Sender, SessionDeps,
};
pub use config::Config;
pub use error::{Error, Result};
pub use net::{ConnectivityMonitor, ConnectivityStatus};
pub use remote::{MemoryRemoteStore, RemoteStore};
pub use retry::RetryPolicy;
pub use subscription::Subscription;
