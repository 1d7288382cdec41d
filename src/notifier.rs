//! Change notification for live subscribers.
//!
//! The notifier is a plain subscription registry: transports (the WebSocket
//! endpoint, tests) subscribe and drain a channel, while the HTTP handlers
//! and the sync coordinator publish. Nothing is replayed to late subscribers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};

use crate::models::Collection;

/// Per-subscriber buffer. A subscriber that falls this far behind misses
/// events and is expected to re-fetch.
const SUBSCRIBER_BUFFER: usize = 64;

/// What caused a collection to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    /// A CRUD call on this node.
    Local,
    /// The shared snapshot file.
    Import,
    /// A direct push from another node.
    Peer,
}

/// Message sent to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChangeEvent {
    /// Greeting sent when a push-channel subscriber connects.
    Connected,
    /// A collection's contents changed; clients should re-fetch it.
    DataChanged {
        collection: Collection,
        origin: ChangeOrigin,
    },
}

impl ChangeEvent {
    pub fn data_changed(collection: Collection, origin: ChangeOrigin) -> Self {
        ChangeEvent::DataChanged { collection, origin }
    }
}

pub type SubscriberId = u64;

/// A live subscription. Dropping the receiver disconnects the subscriber;
/// it is pruned on the next publish.
pub struct Subscription {
    pub id: SubscriberId,
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Registry of connected subscribers.
#[derive(Default)]
pub struct ChangeNotifier {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<ChangeEvent>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    pub async fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::channel(SUBSCRIBER_BUFFER);

        self.subscribers.write().await.insert(id, sender);
        tracing::debug!(subscriber = id, "Subscriber connected");

        Subscription { id, events }
    }

    /// Removes a subscriber. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.write().await.remove(&id).is_some() {
            tracing::debug!(subscriber = id, "Subscriber disconnected");
        }
    }

    /// Sends `event` to every connected subscriber and returns how many
    /// received it. Disconnected subscribers are removed.
    pub async fn publish(&self, event: ChangeEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for (id, sender) in subscribers.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(subscriber = id, "Subscriber lagging, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in dead {
                subscribers.remove(&id);
                tracing::debug!(subscriber = id, "Pruned disconnected subscriber");
            }
        }

        delivered
    }

    /// Announces a change to `collection`.
    pub async fn collection_changed(&self, collection: Collection, origin: ChangeOrigin) {
        let delivered = self
            .publish(ChangeEvent::data_changed(collection, origin))
            .await;
        tracing::debug!(%collection, ?origin, delivered, "Broadcast change");
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Drops every subscriber; their channels close once drained.
    pub async fn close_all(&self) {
        let mut subscribers = self.subscribers.write().await;
        let count = subscribers.len();
        subscribers.clear();
        if count > 0 {
            tracing::debug!(count, "Closed all subscribers");
        }
    }
}
