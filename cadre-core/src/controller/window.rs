use cadre_types::{Event, EventSource};

#[derive(Debug, Clone)]
pub struct WindowResult {
    pub events: Vec<Event>,
    /// Id of the first kept event after the cut, used by later reloads.
    pub truncation_id: Option<i64>,
    /// Id of the first user message, which is always preserved.
    pub start_id: Option<i64>,
}

/// Cut history roughly in half when the context window is exceeded,
/// preserving action/observation pairs and the first user message.
///
/// 1. Keep the second half.
/// 2. Repair the cut: an orphan observation either gets its action
///    prepended or is dropped; user messages at the cut are kept and the
///    scan continues until an agent-sourced action is reached.
/// 3. Prepend the first user message when the cut lost it.
pub fn apply_conversation_window(events: &[Event]) -> WindowResult {
    if events.is_empty() {
        return WindowResult {
            events: Vec::new(),
            truncation_id: None,
            start_id: None,
        };
    }

    let first_user_msg = events
        .iter()
        .find(|e| e.is_message_from(EventSource::User))
        .cloned();

    let mid_point = std::cmp::max(1, events.len() / 2);
    let mut kept: Vec<Event> = events[mid_point..].to_vec();

    let mut i = 0;
    while i < kept.len() {
        let first_event = &kept[i];
        if let Some(observation) = first_event.as_observation() {
            if let Some(cause) = observation.cause {
                let matching_action = events[..mid_point]
                    .iter()
                    .rev()
                    .find(|e| e.is_action() && e.id == cause)
                    .cloned();
                match matching_action {
                    Some(action) => kept.insert(0, action),
                    None => {
                        tracing::warn!(
                            id = first_event.id,
                            "found observation without matching action at cut, dropping it"
                        );
                        kept.remove(i);
                    }
                }
                break;
            }
            // Observation without a cause needs no repair.
            break;
        }

        let is_message = first_event.message_content().is_some();
        let is_user_action = first_event.is_action() && first_event.source == EventSource::User;
        if is_message || is_user_action {
            i += 1;
            continue;
        }

        // An agent-sourced action is a clean cut point.
        break;
    }

    let truncation_id = kept.first().map(|e| e.id);

    if let Some(first_user) = &first_user_msg {
        if !kept.iter().any(|e| e.id == first_user.id) {
            kept.insert(0, first_user.clone());
        }
    }

    WindowResult {
        events: kept,
        truncation_id,
        start_id: first_user_msg.map(|e| e.id),
    }
}
