use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use cadre_types::{Action, Event, EventSource, Observation, ObservationKind};

use crate::events::{EventHandler, EventStream, StreamSubscriber};

struct Recorder {
    seen: Mutex<Vec<i64>>,
}

#[async_trait::async_trait]
impl EventHandler for Recorder {
    async fn on_event(&self, event: Event) {
        self.seen.lock().await.push(event.id);
    }
}

/// Republishes one follow-up for the first event it sees.
struct Echo {
    event_stream: Arc<EventStream>,
    seen: Mutex<Vec<i64>>,
}

#[async_trait::async_trait]
impl EventHandler for Echo {
    async fn on_event(&self, event: Event) {
        let count = {
            let mut seen = self.seen.lock().await;
            seen.push(event.id);
            seen.len()
        };
        if count == 1 {
            self.event_stream
                .publish(Action::message("echo"), EventSource::Agent)
                .await;
        }
    }
}

#[tokio::test]
async fn ids_are_dense_and_increasing() {
    let stream = EventStream::new("test");
    let first = stream
        .publish(Action::message("one"), EventSource::User)
        .await;
    let second = stream
        .publish(
            Observation::new(ObservationKind::Null, "").with_cause(first),
            EventSource::Environment,
        )
        .await;
    let third = stream
        .publish(Action::message("two"), EventSource::Agent)
        .await;
    assert_eq!((first, second, third), (0, 1, 2));
    assert_eq!(stream.latest_id().await, Some(2));
}

#[tokio::test]
async fn subscribers_observe_publication_order() {
    let stream = Arc::new(EventStream::new("test"));
    let recorder = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
    });
    stream.subscribe(StreamSubscriber::Test, recorder.clone(), "rec");

    for i in 0..5 {
        stream
            .publish(Action::message(format!("m{}", i)), EventSource::User)
            .await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*recorder.seen.lock().await, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn publishing_during_a_handler_is_delivered_after_current_delivery() {
    let stream = Arc::new(EventStream::new("test"));
    let echo = Arc::new(Echo {
        event_stream: stream.clone(),
        seen: Mutex::new(Vec::new()),
    });
    stream.subscribe(StreamSubscriber::Test, echo.clone(), "echo");

    stream
        .publish(Action::message("origin"), EventSource::User)
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The handler's own event comes back to it, after the original.
    assert_eq!(*echo.seen.lock().await, vec![0, 1]);
    assert_eq!(stream.latest_id().await, Some(1));
}

#[tokio::test]
async fn range_queries_filter_hidden_and_reverse() {
    let stream = EventStream::new("test");
    stream
        .publish(Action::message("visible"), EventSource::User)
        .await;
    let mut hidden = Action::message("hidden");
    hidden.hidden = true;
    stream.publish(hidden, EventSource::User).await;
    stream
        .publish(Action::message("visible too"), EventSource::Agent)
        .await;

    let all = stream.get_events(0, None, false, false).await;
    assert_eq!(all.len(), 3);

    let filtered = stream.get_events(0, None, false, true).await;
    assert_eq!(filtered.iter().map(|e| e.id).collect::<Vec<_>>(), vec![0, 2]);

    let reversed = stream.get_events(0, None, true, true).await;
    assert_eq!(reversed.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 0]);

    let bounded = stream.get_events(1, Some(1), false, false).await;
    assert_eq!(bounded.len(), 1);
    assert_eq!(bounded[0].id, 1);
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let stream = Arc::new(EventStream::new("test"));
    let recorder = Arc::new(Recorder {
        seen: Mutex::new(Vec::new()),
    });
    stream.subscribe(StreamSubscriber::Test, recorder.clone(), "rec");
    stream
        .publish(Action::message("before"), EventSource::User)
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    stream.unsubscribe(StreamSubscriber::Test, "rec");
    stream
        .publish(Action::message("after"), EventSource::User)
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*recorder.seen.lock().await, vec![0]);
}
