use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, RwLock};

use cadre_types::{Event, EventPayload, EventSource};

/// Time each subscriber yields between event deliveries so no handler can
/// monopolise the loop.
const DELIVERY_YIELD: Duration = Duration::from_millis(10);

/// Well-known subscriber groups; a `(subscriber, id)` pair addresses one
/// subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSubscriber {
    Main,
    PlanController,
    TaskController,
    Memory,
    Runtime,
    Test,
}

#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: Event);
}

struct Subscription {
    sender: mpsc::UnboundedSender<Event>,
    handle: tokio::task::JoinHandle<()>,
}

/// Append-only ordered log of events with publish/subscribe fan-out.
///
/// Ids are dense and strictly increasing; assignment happens atomically
/// with the append. Each subscriber gets its own FIFO queue drained on a
/// dedicated task, so handlers observe events in publication order and
/// publishing from within a handler is allowed (the new event is queued
/// behind the current delivery).
pub struct EventStream {
    sid: String,
    events: RwLock<Vec<Event>>,
    subscriptions: DashMap<(StreamSubscriber, String), Subscription>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").field("sid", &self.sid).finish()
    }
}

impl EventStream {
    pub fn new(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            events: RwLock::new(Vec::new()),
            subscriptions: DashMap::new(),
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Append an event and fan it out to every subscriber. Returns the
    /// assigned id.
    pub async fn publish(&self, payload: impl Into<EventPayload>, source: EventSource) -> i64 {
        let payload = payload.into();
        let event = {
            let mut events = self.events.write().await;
            let event = Event {
                id: events.len() as i64,
                source,
                cause: payload.cause(),
                hidden: payload.hidden(),
                timestamp: Utc::now(),
                payload,
            };
            events.push(event.clone());
            event
        };

        tracing::trace!(sid = %self.sid, id = event.id, "published event");
        self.subscriptions.retain(|key, subscription| {
            if subscription.sender.send(event.clone()).is_err() {
                tracing::debug!(sid = %self.sid, ?key, "dropping dead subscription");
                false
            } else {
                true
            }
        });
        event.id
    }

    /// Id of the most recently published event, or `None` when empty.
    pub async fn latest_id(&self) -> Option<i64> {
        let events = self.events.read().await;
        events.last().map(|e| e.id)
    }

    /// Events in `[start_id, end_id]` (inclusive; `None` end means the
    /// latest), optionally reversed and with hidden events filtered out.
    pub async fn get_events(
        &self,
        start_id: i64,
        end_id: Option<i64>,
        reverse: bool,
        filter_hidden: bool,
    ) -> Vec<Event> {
        let events = self.events.read().await;
        let end = end_id.unwrap_or(events.len() as i64 - 1);
        let mut selected: Vec<Event> = events
            .iter()
            .filter(|e| e.id >= start_id && e.id <= end)
            .filter(|e| !(filter_hidden && e.hidden))
            .cloned()
            .collect();
        if reverse {
            selected.reverse();
        }
        selected
    }

    /// Same as [`get_events`] with an additional caller-supplied drop
    /// predicate, mirroring the controller's filtered history loads.
    pub async fn get_events_filtered(
        &self,
        start_id: i64,
        end_id: Option<i64>,
        filter_hidden: bool,
        filter_out: impl Fn(&Event) -> bool,
    ) -> Vec<Event> {
        self.get_events(start_id, end_id, false, filter_hidden)
            .await
            .into_iter()
            .filter(|e| !filter_out(e))
            .collect()
    }

    /// Register a handler; events publish after this call are delivered in
    /// order on a dedicated task.
    pub fn subscribe(
        &self,
        subscriber: StreamSubscriber,
        handler: Arc<dyn EventHandler>,
        subscriber_id: impl Into<String>,
    ) {
        let subscriber_id = subscriber_id.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Event>();
        let sid = self.sid.clone();
        let id = subscriber_id.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                // Give other tasks a chance between deliveries.
                tokio::time::sleep(DELIVERY_YIELD).await;
                handler.on_event(event).await;
            }
            tracing::debug!(%sid, %id, "subscription drained");
        });

        if let Some(previous) = self
            .subscriptions
            .insert((subscriber, subscriber_id.clone()), Subscription { sender, handle })
        {
            tracing::warn!(sid = %self.sid, %subscriber_id, "replacing existing subscription");
            previous.handle.abort();
        }
    }

    /// Remove a subscription; queued events for it are still delivered.
    pub fn unsubscribe(&self, subscriber: StreamSubscriber, subscriber_id: &str) {
        if self
            .subscriptions
            .remove(&(subscriber, subscriber_id.to_string()))
            .is_none()
        {
            tracing::debug!(sid = %self.sid, %subscriber_id, "unsubscribe for unknown subscription");
        }
    }

    /// Drop all subscriptions and abort their delivery tasks.
    pub fn close(&self) {
        self.subscriptions.retain(|_, subscription| {
            subscription.handle.abort();
            false
        });
    }
}
