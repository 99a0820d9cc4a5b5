//! Connectivity monitor: a single source of online/offline transitions.
//!
//! Every subscriber gets its own unbounded channel. The current status is
//! pushed into the channel under the same lock that registers it, so a
//! subscriber always sees the status at subscription time followed by every
//! later transition, with nothing lost in between.

use crate::subscription::Subscription;
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Reachability as last reported by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivityStatus {
    pub connected: bool,
}

struct State {
    current: ConnectivityStatus,
    subscribers: Vec<mpsc::UnboundedSender<ConnectivityStatus>>,
}

/// Process-wide connectivity state, shared by cloning the handle.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    state: Arc<Mutex<State>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with a known initial status.
    pub fn new(connected: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                current: ConnectivityStatus { connected },
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current reachability.
    pub fn current_status(&self) -> ConnectivityStatus {
        self.lock().current
    }

    pub fn is_connected(&self) -> bool {
        self.current_status().connected
    }

    /// Push a status from the oracle. Returns whether it was a transition.
    pub fn set_connected(&self, connected: bool) -> bool {
        let mut state = self.lock();
        if state.current.connected == connected {
            return false;
        }

        state.current = ConnectivityStatus { connected };
        let status = state.current;
        state.subscribers.retain(|tx| tx.send(status).is_ok());

        info!(
            "Connectivity changed: {}",
            if connected { "online" } else { "offline" }
        );
        true
    }

    /// Raw event stream: the current status first, then every transition.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<ConnectivityStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        // Receiver is alive, so this cannot fail.
        let _ = tx.send(state.current);
        state.subscribers.push(tx);
        rx
    }

    /// Run `handler` for the current status and for every later transition,
    /// one call at a time, until the returned subscription is dropped.
    pub fn subscribe<F, Fut>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(ConnectivityStatus) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.watch();
        Subscription::new(tokio::spawn(async move {
            while let Some(status) = rx.recv().await {
                handler(status).await;
            }
        }))
    }

    /// Number of live subscribers (closed ones are pruned on the next transition).
    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

/// Pull side of the connectivity oracle.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Check reachability right now.
    async fn probe(&self) -> bool;
}

/// Treats the network as reachable when a TCP connection to `address` opens.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe to {} failed: {}", self.address, e);
                false
            }
            Err(_) => {
                debug!("Probe to {} timed out", self.address);
                false
            }
        }
    }
}

/// Poll `probe` every `interval` and feed the results into `monitor`.
pub fn spawn_probe_loop(
    monitor: ConnectivityMonitor,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
) -> Subscription {
    Subscription::new(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let connected = probe.probe().await;
            monitor.set_connected(connected);
        }
    }))
}
