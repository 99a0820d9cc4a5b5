//! Common test utilities for integration tests.
//!
//! This module provides shared test helpers and fixtures for integration
//! testing the delivery pipeline against the in-process remote store.

use courier_core::chat::Dispatcher;
use courier_core::{ConnectivityMonitor, Draft, LocalStore, MemoryRemoteStore, RetryPolicy, Sender};
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for test operations.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Base delay for retry loops in tests.
#[allow(dead_code)]
pub const FAST_RETRY: Duration = Duration::from_millis(2);

/// Initialize test logging with appropriate filters.
///
/// Call this at the start of tests that need debug output.
/// Safe to call multiple times (subsequent calls are no-ops).
#[allow(dead_code)]
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("courier_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Run an async operation with a timeout.
///
/// Returns the result if the operation completes within the timeout,
/// or panics with a timeout message if it doesn't.
#[allow(dead_code)]
pub async fn with_timeout<T, F>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, fut)
        .await
        .expect("Test operation timed out")
}

/// A dispatcher wired to an in-process remote store and a temporary database.
#[allow(dead_code)]
pub struct Harness {
    pub remote: Arc<MemoryRemoteStore>,
    pub connectivity: ConnectivityMonitor,
    pub store: LocalStore,
    pub dispatcher: Arc<Dispatcher>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(connected: bool) -> Self {
        let remote = Arc::new(MemoryRemoteStore::new());
        let connectivity = ConnectivityMonitor::new(connected);
        let store = LocalStore::open_temporary(100).expect("temporary database");
        let dispatcher = Arc::new(
            Dispatcher::new(remote.clone(), &store, connectivity.clone())
                .with_retry(RetryPolicy::new(3, FAST_RETRY)),
        );
        Self {
            remote,
            connectivity,
            store,
            dispatcher,
        }
    }

    /// Take both the connectivity oracle and the remote store offline or online.
    pub fn set_online(&self, online: bool) {
        self.remote.set_online(online);
        self.connectivity.set_connected(online);
    }

    /// Texts committed remotely, in commit order.
    pub fn remote_texts(&self) -> Vec<String> {
        self.remote
            .records()
            .iter()
            .filter_map(|m| m.text().map(str::to_string))
            .collect()
    }
}

/// A text draft from a fixed test user.
#[allow(dead_code)]
pub fn draft(text: &str) -> Draft {
    Draft::text(Sender::new("tester", "Tester"), text)
}
