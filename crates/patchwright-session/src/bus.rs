//! Per-session in-memory event fan-out with keepalive

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

struct Entry {
    id: u64,
    tx: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

/// Fan-out of wire events to any number of subscribers, keyed by session id.
/// Publish never blocks; each subscriber drains its own unbounded queue.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, session_id: &str, event: Value) {
        if let Ok(subscribers) = self.inner.subscribers.lock() {
            if let Some(entries) = subscribers.get(session_id) {
                trace!("publish to {} subscriber(s) of {}", entries.len(), session_id);
                for entry in entries {
                    let _ = entry.tx.send(event.clone());
                }
            }
        }
    }

    pub fn subscribe(&self, session_id: &str) -> Subscription {
        self.subscribe_with_keepalive(session_id, DEFAULT_KEEPALIVE)
    }

    pub fn subscribe_with_keepalive(&self, session_id: &str, keepalive: Duration) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers
                .entry(session_id.to_string())
                .or_default()
                .push(Entry { id, tx });
        }
        Subscription {
            inner: self.inner.clone(),
            session_id: session_id.to_string(),
            id,
            rx,
            keepalive,
        }
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .map(|s| s.get(session_id).map(|e| e.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

/// One subscriber's view of a session stream. Dropping it unregisters the
/// queue; the session key is purged when the last subscriber leaves.
pub struct Subscription {
    inner: Arc<BusInner>,
    session_id: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Value>,
    keepalive: Duration,
}

impl Subscription {
    /// Next event, or a keepalive record when nothing arrives within the
    /// wait window.
    pub async fn next(&mut self) -> Value {
        match tokio::time::timeout(self.keepalive, self.rx.recv()).await {
            Ok(Some(event)) => event,
            // Sender side only closes when the bus itself is gone.
            Ok(None) => keepalive_record(),
            Err(_) => keepalive_record(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            if let Some(entries) = subscribers.get_mut(&self.session_id) {
                entries.retain(|e| e.id != self.id);
                if entries.is_empty() {
                    subscribers.remove(&self.session_id);
                }
            }
        }
    }
}

fn keepalive_record() -> Value {
    json!({
        "type": "keepalive",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_to_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("s1");
        let mut b = bus.subscribe("s1");

        bus.publish("s1", json!({"type": "status_change", "n": 1}));
        assert_eq!(a.next().await["n"], 1);
        assert_eq!(b.next().await["n"], 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let bus = EventBus::new();
        let mut other = bus.subscribe_with_keepalive("s2", Duration::from_millis(50));

        bus.publish("s1", json!({"n": 1}));
        let got = other.next().await;
        assert_eq!(got["type"], "keepalive");
    }

    #[tokio::test]
    async fn keepalive_on_idle_then_live_events_continue() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe_with_keepalive("s1", Duration::from_millis(50));

        let first = sub.next().await;
        assert_eq!(first["type"], "keepalive");
        assert!(first["timestamp"].as_str().is_some());

        bus.publish("s1", json!({"type": "agent_message"}));
        assert_eq!(sub.next().await["type"], "agent_message");
    }

    #[tokio::test]
    async fn drop_unregisters_and_purges_session_key() {
        let bus = EventBus::new();
        let a = bus.subscribe("s1");
        let b = bus.subscribe("s1");
        assert_eq!(bus.subscriber_count("s1"), 2);

        drop(a);
        assert_eq!(bus.subscriber_count("s1"), 1);
        drop(b);
        assert_eq!(bus.subscriber_count("s1"), 0);
        assert!(bus
            .inner
            .subscribers
            .lock()
            .unwrap()
            .get("s1")
            .is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish("ghost", json!({"n": 1}));
    }
}
