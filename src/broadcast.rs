use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// A single fan-out message. `event_type` is one of the vocabulary strings
/// documented alongside the emitting component (`scan_started`,
/// `alert_created`, `host_online`, ...); `data` is whatever payload that
/// event carries.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

struct Subscriber {
    id: Uuid,
    sender: mpsc::Sender<Event>,
}

/// Process-wide fan-out point. Every component that produces events
/// (Scanner, AlertEngine, Engine itself) publishes here; nothing subscribes
/// to another component directly.
#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Registers a new subscriber with the given channel capacity and returns
    /// the receiving half plus the id used to `unsubscribe` later.
    pub async fn subscribe(&self, capacity: usize) -> (Uuid, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = Uuid::new_v4();
        self.subscribers.write().await.push(Subscriber { id, sender: tx });
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Drops every subscriber handle, as on process shutdown.
    pub async fn close_all(&self) {
        self.subscribers.write().await.clear();
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Best-effort delivery: a subscriber whose channel is full or closed is
    /// evicted in the same pass rather than left to block or lag forever.
    pub async fn publish(&self, event_type: impl Into<String>, data: Value) {
        let event = Event::new(event_type, data);
        let mut subs = self.subscribers.write().await;
        subs.retain(|s| s.sender.try_send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = Broadcaster::new();
        let (_id, mut rx) = bus.subscribe(8).await;

        bus.publish("scan_started", json!({"range": "10.0.0.0/24"})).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "scan_started");
        assert_eq!(event.data["range"], "10.0.0.0/24");
    }

    #[tokio::test]
    async fn full_channel_evicts_subscriber() {
        let bus = Broadcaster::new();
        let (_id, _rx) = bus.subscribe(1).await;

        bus.publish("a", json!({})).await;
        bus.publish("b", json!({})).await; // first slot full, receiver never drained -> evicted
        bus.publish("c", json!({})).await;

        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn close_all_removes_every_subscriber() {
        let bus = Broadcaster::new();
        bus.subscribe(4).await;
        bus.subscribe(4).await;
        assert_eq!(bus.subscriber_count().await, 2);
        bus.close_all().await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_handle() {
        let bus = Broadcaster::new();
        let (id, _rx) = bus.subscribe(4).await;
        assert_eq!(bus.subscriber_count().await, 1);
        bus.unsubscribe(id).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn dropped_receiver_is_evicted_on_next_publish() {
        let bus = Broadcaster::new();
        let (_id, rx) = bus.subscribe(4).await;
        drop(rx);
        bus.publish("x", json!({})).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }
}
