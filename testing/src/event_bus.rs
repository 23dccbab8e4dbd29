//! In-memory event bus for tests and single-process deployments.
//!
//! Fan-out is synchronous at publish time: every current subscriber of the
//! channel receives a copy through an unbounded queue, so per-publisher
//! per-channel order is preserved. Delivery is at-least-once from the
//! consumer's point of view; handlers stay idempotent either way.

use futures::Stream;
use purchase_saga_core::bus::{BusFuture, EventBus, EventBusError, EventStream};
use purchase_saga_core::envelope::Envelope;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};

/// In-memory publish/subscribe bus.
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>>,
}

impl InMemoryEventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct SubscriptionStream {
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Stream for SubscriptionStream {
    type Item = Result<Envelope, EventBusError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx).map(|next| next.map(Ok))
    }
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(&'a self, channel: &str, envelope: &Envelope) -> BusFuture<'a, ()> {
        let channel = channel.to_string();
        let envelope = envelope.clone();
        Box::pin(async move {
            let mut subscribers = self.subscribers.lock().await;
            if let Some(senders) = subscribers.get_mut(&channel) {
                // Drop subscribers whose stream has been closed.
                senders.retain(|sender| sender.send(envelope.clone()).is_ok());
            }
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, channels: &[&str]) -> BusFuture<'a, EventStream> {
        let channels: Vec<String> = channels.iter().map(ToString::to_string).collect();
        Box::pin(async move {
            let (sender, receiver) = mpsc::unbounded_channel();
            let mut subscribers = self.subscribers.lock().await;
            for channel in channels {
                subscribers.entry(channel).or_default().push(sender.clone());
            }
            Ok(Box::pin(SubscriptionStream { receiver }) as EventStream)
        })
    }
}

/// Captures every envelope seen on the subscribed channels, for ordered
/// assertions in integration tests.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Envelope>>>,
    arrived: Arc<Notify>,
}

impl EventRecorder {
    /// Subscribe to the given channels and start recording.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] if the subscription fails.
    pub async fn attach(
        bus: &dyn EventBus,
        channels: &[&str],
    ) -> Result<Self, EventBusError> {
        use futures::StreamExt;

        let mut stream = bus.subscribe(channels).await?;
        let events = Arc::new(Mutex::new(Vec::new()));
        let arrived = Arc::new(Notify::new());

        let events_writer = Arc::clone(&events);
        let arrived_writer = Arc::clone(&arrived);
        tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                if let Ok(envelope) = next {
                    events_writer.lock().await.push(envelope);
                    arrived_writer.notify_waiters();
                }
            }
        });

        Ok(Self { events, arrived })
    }

    /// Everything recorded so far, in arrival order.
    pub async fn recorded(&self) -> Vec<Envelope> {
        self.events.lock().await.clone()
    }

    /// Event type strings in arrival order.
    pub async fn types(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|envelope| envelope.event_type.clone())
            .collect()
    }

    /// How many envelopes of the given type arrived so far.
    pub async fn count_of(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|envelope| envelope.is(event_type))
            .count()
    }

    /// Wait until an envelope of the given type has arrived, up to
    /// `timeout`. Returns the first matching envelope, or `None` on
    /// timeout.
    pub async fn wait_for(&self, event_type: &str, timeout: Duration) -> Option<Envelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.arrived.notified();
            {
                let events = self.events.lock().await;
                if let Some(found) = events.iter().find(|envelope| envelope.is(event_type)) {
                    return Some(found.clone());
                }
            }
            let remaining = deadline.checked_duration_since(tokio::time::Instant::now())?;
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Wait until at least `count` envelopes of the given type arrived.
    pub async fn wait_for_count(
        &self,
        event_type: &str,
        count: usize,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.arrived.notified();
            if self.count_of(event_type).await >= count {
                return true;
            }
            let Some(remaining) = deadline.checked_duration_since(tokio::time::Instant::now())
            else {
                return false;
            };
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return false;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Tick {
        seq: u32,
    }

    impl purchase_saga_core::envelope::Event for Tick {
        fn event_type(&self) -> &'static str {
            "test.tick"
        }
    }

    fn envelope(seq: u32) -> Envelope {
        Envelope::encode(&Tick { seq }, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["test.tick"]).await.unwrap();

        bus.publish("test.tick", &envelope(1)).await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.event_type, "test.tick");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = InMemoryEventBus::new();
        bus.publish("test.tick", &envelope(1)).await.unwrap();
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let bus = InMemoryEventBus::new();
        let mut first = bus.subscribe(&["test.tick"]).await.unwrap();
        let mut second = bus.subscribe(&["test.tick"]).await.unwrap();

        bus.publish("test.tick", &envelope(7)).await.unwrap();

        let a = first.next().await.unwrap().unwrap();
        let b = second.next().await.unwrap().unwrap();
        assert_eq!(a.data, b.data);
    }

    #[tokio::test]
    async fn per_publisher_order_is_preserved() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["test.tick"]).await.unwrap();

        for seq in 0..20 {
            bus.publish("test.tick", &envelope(seq)).await.unwrap();
        }

        for expected in 0..20 {
            let received = stream.next().await.unwrap().unwrap();
            let tick: Tick = received.decode().unwrap();
            assert_eq!(tick.seq, expected);
        }
    }

    #[tokio::test]
    async fn recorder_waits_for_event() {
        let bus = InMemoryEventBus::new();
        let recorder = EventRecorder::attach(&bus, &["test.tick"]).await.unwrap();

        bus.publish("test.tick", &envelope(1)).await.unwrap();

        let found = recorder
            .wait_for("test.tick", Duration::from_secs(1))
            .await;
        assert!(found.is_some());
        assert_eq!(recorder.count_of("test.tick").await, 1);
        assert_eq!(recorder.types().await, vec!["test.tick".to_string()]);
    }

    #[tokio::test]
    async fn recorder_times_out_on_absent_event() {
        let bus = InMemoryEventBus::new();
        let recorder = EventRecorder::attach(&bus, &["test.tick"]).await.unwrap();

        let found = recorder
            .wait_for("test.other", Duration::from_millis(50))
            .await;
        assert!(found.is_none());
    }
}
