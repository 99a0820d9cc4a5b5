//! Subcommand implementations.

pub mod cache;
pub mod clear;
pub mod config;
pub mod queue;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use courier_core::{ChatMessage, Config, LocalStore};

/// Open the local message database named by `config`.
pub fn open_store(config: &Config) -> Result<LocalStore> {
    let path = config.database_path();
    LocalStore::open(&path, config.cache_capacity)
        .with_context(|| format!("failed to open message database at {:?}", path))
}

/// One-line rendering of a message for terminal output.
pub fn format_message(message: &ChatMessage) -> String {
    let time = message
        .display_time()
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    let author = if message.is_ai() {
        format!("{} (AI)", message.sender_name())
    } else {
        message.sender_name().to_string()
    };
    let mut line = format!("[{}] {}: {}", time, author, message.preview());
    if let Some(url) = message.image_url() {
        if message.text().is_some() {
            line.push_str(&format!(" <{}>", url));
        } else {
            line = format!("[{}] {}: [image] {}", time, author, url);
        }
    }
    if message.is_deleted() {
        line.push_str(" (deleted)");
    }
    line
}
