//! Live feed of committed messages.
//!
//! One standing query against the remote store. Every notification carries
//! the full ordered result set, which overwrites the offline cache and is
//! handed to the update callback. When the query breaks, the callback gets
//! the cached snapshot once and the feed stays down until re-subscribed.

use crate::chat::cache::CacheStore;
use crate::chat::store::LocalStore;
use crate::chat::types::{sort_for_display, ChatMessage};
use crate::error::Error;
use crate::remote::RemoteStore;
use crate::subscription::Subscription;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Receives the complete ordered message list on every feed update.
pub type UpdateCallback = Arc<dyn Fn(Vec<ChatMessage>) + Send + Sync>;

struct FeedState {
    active: Option<Subscription>,
    on_update: Option<UpdateCallback>,
}

/// Subscriber to the remote store's change notifications.
pub struct LiveFeed {
    remote: Arc<dyn RemoteStore>,
    cache: CacheStore,
    state: Mutex<FeedState>,
}

impl LiveFeed {
    pub fn new(remote: Arc<dyn RemoteStore>, store: &LocalStore) -> Self {
        Self {
            remote,
            cache: store.cache(),
            state: Mutex::new(FeedState {
                active: None,
                on_update: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the standing query, replacing any earlier subscription.
    pub fn subscribe<F>(&self, on_update: F)
    where
        F: Fn(Vec<ChatMessage>) + Send + Sync + 'static,
    {
        let on_update: UpdateCallback = Arc::new(on_update);
        let mut state = self.lock();
        state.on_update = Some(on_update.clone());
        self.restart(&mut state, on_update);
    }

    /// Start the query again with the last callback. Returns false when
    /// nothing was ever subscribed.
    pub fn resubscribe(&self) -> bool {
        let mut state = self.lock();
        match state.on_update.clone() {
            Some(on_update) => {
                self.restart(&mut state, on_update);
                true
            }
            None => false,
        }
    }

    fn restart(&self, state: &mut FeedState, on_update: UpdateCallback) {
        if let Some(previous) = state.active.take() {
            debug!("Tearing down previous feed subscription");
            previous.unsubscribe();
        }

        let remote = self.remote.clone();
        let cache = self.cache.clone();
        state.active = Some(Subscription::new(tokio::spawn(run_feed(
            remote, cache, on_update,
        ))));
    }

    /// Stop the standing query. Callbacks stop firing immediately.
    pub fn unsubscribe(&self) {
        let active = self.lock().active.take();
        if let Some(active) = active {
            active.unsubscribe();
            info!("Live feed unsubscribed");
        }
    }

    /// Whether the standing query is currently running.
    pub fn is_active(&self) -> bool {
        self.lock().active.as_ref().is_some_and(|s| s.is_active())
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn run_feed(remote: Arc<dyn RemoteStore>, cache: CacheStore, on_update: UpdateCallback) {
    let mut stream = match remote.subscribe().await {
        Ok(stream) => stream,
        Err(e) => {
            fall_back_to_cache(&cache, &on_update, &e);
            return;
        }
    };
    info!("Live feed subscribed");

    while let Some(item) = stream.recv().await {
        match item {
            Ok(mut messages) => {
                sort_for_display(&mut messages);
                if let Err(e) = cache.replace(&messages) {
                    warn!("Failed to refresh message cache: {}", e);
                }
                debug!("Feed update with {} messages", messages.len());
                on_update(messages);
            }
            Err(e) => {
                fall_back_to_cache(&cache, &on_update, &e);
                return;
            }
        }
    }
    debug!("Feed stream closed");
}

fn fall_back_to_cache(cache: &CacheStore, on_update: &UpdateCallback, error: &Error) {
    warn!("Live feed failed, showing cached messages: {}", error);
    let cached = cache.read().unwrap_or_else(|e| {
        warn!("Failed to read message cache: {}", e);
        Vec::new()
    });
    on_update(cached);
}
