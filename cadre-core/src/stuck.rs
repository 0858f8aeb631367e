use cadre_types::{Event, EventPayload, EventSource, ObservationKind};

/// Observes the tail of history and flags repetitive patterns:
/// identical action/observation pairs, repeated identical errors, and
/// oscillation between two alternating pairs.
#[derive(Debug, Clone)]
pub struct StuckDetector {
    /// Consecutive identical action/observation pairs before flagging.
    pub repeat_threshold: usize,
    /// Identical error observations before flagging.
    pub error_threshold: usize,
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self {
            repeat_threshold: 3,
            error_threshold: 3,
        }
    }
}

/// Comparison key: the serialized payload with volatile fields dropped.
fn fingerprint(event: &Event) -> String {
    match &event.payload {
        EventPayload::Action(action) => {
            format!("a:{}", serde_json::to_string(&action.kind).unwrap_or_default())
        }
        EventPayload::Observation(observation) => format!(
            "o:{}:{}",
            serde_json::to_string(&observation.kind).unwrap_or_default(),
            observation.content
        ),
    }
}

impl StuckDetector {
    pub fn is_stuck(&self, history: &[Event], headless: bool) -> bool {
        // Only look at what happened since the last user message.
        let tail_start = history
            .iter()
            .rposition(|e| e.is_message_from(EventSource::User))
            .map(|i| i + 1)
            .unwrap_or(0);
        let tail: Vec<&Event> = history[tail_start..]
            .iter()
            .filter(|e| {
                !matches!(
                    &e.payload,
                    EventPayload::Observation(o) if matches!(
                        o.kind,
                        ObservationKind::AgentStateChanged { .. } | ObservationKind::Null
                    )
                )
            })
            .collect();

        let stuck = self.repeating_pairs(&tail)
            || self.repeating_errors(&tail)
            || self.oscillating(&tail);
        if stuck {
            if headless {
                tracing::error!("Agent detected stuck in a loop, headless session will abort");
            } else {
                tracing::warn!("Agent detected stuck in a loop");
            }
        }
        stuck
    }

    /// N consecutive identical (action, observation) pairs at the tail.
    fn repeating_pairs(&self, tail: &[&Event]) -> bool {
        let needed = self.repeat_threshold * 2;
        if tail.len() < needed {
            return false;
        }
        let window = &tail[tail.len() - needed..];
        let first_action = fingerprint(window[0]);
        let first_obs = fingerprint(window[1]);
        if !window[0].is_action() || !window[1].is_observation() {
            return false;
        }
        window.chunks(2).all(|pair| {
            pair.len() == 2
                && fingerprint(pair[0]) == first_action
                && fingerprint(pair[1]) == first_obs
        })
    }

    /// The same error observation repeated N times in the tail.
    fn repeating_errors(&self, tail: &[&Event]) -> bool {
        let errors: Vec<&Event> = tail
            .iter()
            .filter(|e| e.as_observation().map(|o| o.is_error()).unwrap_or(false))
            .copied()
            .collect();
        if errors.len() < self.error_threshold {
            return false;
        }
        let recent = &errors[errors.len() - self.error_threshold..];
        let first = fingerprint(recent[0]);
        recent.iter().all(|e| fingerprint(e) == first)
    }

    /// Alternation between two distinct action/observation pairs:
    /// a1 o1 a2 o2 a1 o1 a2 o2.
    fn oscillating(&self, tail: &[&Event]) -> bool {
        if tail.len() < 8 {
            return false;
        }
        let window = &tail[tail.len() - 8..];
        if !window.iter().step_by(2).all(|e| e.is_action())
            || !window.iter().skip(1).step_by(2).all(|e| e.is_observation())
        {
            return false;
        }
        let prints: Vec<String> = window.iter().map(|e| fingerprint(e)).collect();
        let first_pair = (&prints[0], &prints[1]);
        let second_pair = (&prints[2], &prints[3]);
        first_pair != second_pair
            && prints[4] == *first_pair.0
            && prints[5] == *first_pair.1
            && prints[6] == *second_pair.0
            && prints[7] == *second_pair.1
    }
}
