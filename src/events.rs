//! Per-request event fan-out for streamed results.
//!
//! Remote nodes push token results and opaque status updates tagged with a
//! correlation id; the receiving endpoint routes them through a registry of
//! channels to whatever local consumers are awaiting that id. Token events
//! and status events live in separate typed registries, so a subscription is
//! always for exactly one (request id, event kind) pair.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

/// A streamed token batch for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    /// Token ids produced so far in this batch
    pub tokens: Vec<u32>,

    /// Whether this is the terminal batch for the request
    pub is_finished: bool,
}

/// Registry of event channels keyed by correlation id.
///
/// Subscriptions are delivered in registration order and are scoped to the
/// lifetime of the request: drop the receiver (or call [`unsubscribe`]) once
/// the request completes.
///
/// [`unsubscribe`]: EventRegistry::unsubscribe
#[derive(Debug)]
pub struct EventRegistry<T> {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<T>>>>,
}

impl<T> Default for EventRegistry<T> {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone + Send + 'static> EventRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer for events under the given request id.
    pub async fn subscribe(&self, request_id: &str) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .await
            .entry(request_id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Deliver an event to every subscriber registered under exactly this
    /// request id, in registration order. Subscribers whose receiver has
    /// been dropped are pruned.
    pub async fn trigger_all(&self, request_id: &str, event: T) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(senders) = subscribers.get_mut(request_id) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
            if senders.is_empty() {
                subscribers.remove(request_id);
            }
        }
    }

    /// Drop every subscription for the given request id.
    pub async fn unsubscribe(&self, request_id: &str) {
        self.subscribers.write().await.remove(request_id);
    }

    /// Number of live subscriptions for the given request id.
    pub async fn subscriber_count(&self, request_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(request_id)
            .map_or(0, Vec::len)
    }
}
