use std::sync::Arc;

use cadre_types::{ActionKind, Event, EventSource, Observation, ObservationKind};

use crate::events::{EventHandler, EventStream, StreamSubscriber};

/// Answers `Recall` actions on the stream.
///
/// Microagent knowledge retrieval is an external collaborator; this
/// responder keeps histories well-formed by publishing the observation a
/// pending recall is waiting for. The content is whatever the configured
/// provider returns, empty by default.
pub struct RecallMemory {
    event_stream: Arc<EventStream>,
    provider: Option<Box<dyn Fn(&str) -> String + Send + Sync>>,
}

impl RecallMemory {
    pub fn new(event_stream: Arc<EventStream>) -> Arc<Self> {
        Arc::new(Self {
            event_stream,
            provider: None,
        })
    }

    pub fn with_provider(
        event_stream: Arc<EventStream>,
        provider: Box<dyn Fn(&str) -> String + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            event_stream,
            provider: Some(provider),
        })
    }

    pub fn attach(self: &Arc<Self>, subscriber_id: &str) {
        self.event_stream
            .subscribe(StreamSubscriber::Memory, self.clone(), subscriber_id);
    }
}

#[async_trait::async_trait]
impl EventHandler for RecallMemory {
    async fn on_event(&self, event: Event) {
        let Some(action) = event.as_action() else {
            return;
        };
        let ActionKind::Recall { query, .. } = &action.kind else {
            return;
        };
        let content = self
            .provider
            .as_ref()
            .map(|p| p(query))
            .unwrap_or_default();
        let observation =
            Observation::new(ObservationKind::Null, content).with_cause(event.id);
        self.event_stream
            .publish(observation, EventSource::Environment)
            .await;
    }
}
