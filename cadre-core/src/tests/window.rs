use chrono::Utc;

use cadre_types::{
    Action, ActionKind, Event, EventPayload, EventSource, Observation, ObservationKind,
};

use crate::controller::apply_conversation_window;

fn event(id: i64, source: EventSource, payload: EventPayload) -> Event {
    Event {
        id,
        source,
        cause: payload.cause(),
        hidden: false,
        timestamp: Utc::now(),
        payload,
    }
}

fn user_message(id: i64, content: &str) -> Event {
    event(
        id,
        EventSource::User,
        EventPayload::Action(Action::message(content)),
    )
}

fn cmd(id: i64, command: &str) -> Event {
    event(
        id,
        EventSource::Agent,
        EventPayload::Action(Action::new(ActionKind::CmdRun {
            command: command.into(),
        })),
    )
}

fn output(id: i64, cause: i64) -> Event {
    event(
        id,
        EventSource::Environment,
        EventPayload::Observation(
            Observation::new(ObservationKind::CmdOutput { exit_code: 0 }, "ok")
                .with_cause(cause),
        ),
    )
}

#[test]
fn keeps_second_half_and_first_user_message() {
    // U0, then 4 action/observation pairs
    let events = vec![
        user_message(0, "do the thing"),
        cmd(1, "a"),
        output(2, 1),
        cmd(3, "b"),
        output(4, 3),
        cmd(5, "c"),
        output(6, 5),
        cmd(7, "d"),
        output(8, 7),
    ];
    let window = apply_conversation_window(&events);

    // first user message present exactly once
    let user_count = window
        .events
        .iter()
        .filter(|e| e.is_message_from(EventSource::User))
        .count();
    assert_eq!(user_count, 1);
    assert_eq!(window.events[0].id, 0);
    assert_eq!(window.start_id, Some(0));

    // every observation kept has its action in the window
    for e in &window.events {
        if let Some(obs) = e.as_observation() {
            let cause = obs.cause.unwrap();
            assert!(
                window.events.iter().any(|a| a.id == cause),
                "observation {} lost its action",
                e.id
            );
        }
    }
    assert!(window.events.len() < events.len());
}

#[test]
fn orphan_observation_at_cut_pulls_its_action() {
    // cut lands on the observation of pair (3,4)
    let events = vec![
        user_message(0, "go"),
        cmd(1, "a"),
        output(2, 1),
        cmd(3, "b"),
        output(4, 3),
        cmd(5, "c"),
        output(6, 5),
    ];
    // mid = 3, kept starts at id 3? events[3..] = [3,4,5,6] -> first is an
    // action from the agent, clean cut.
    let window = apply_conversation_window(&events);
    assert_eq!(window.truncation_id, Some(3));
    assert!(window.events.iter().any(|e| e.id == 0));

    // Force an observation-first cut.
    let events = vec![
        user_message(0, "go"),
        cmd(1, "a"),
        output(2, 1),
        cmd(3, "b"),
        output(4, 3),
        output(5, 3),
        cmd(6, "c"),
        output(7, 6),
    ];
    // mid = 4, kept starts at the observation with cause 3
    let window = apply_conversation_window(&events);
    assert_eq!(window.events[0].id, 0); // U0 prepended
    let first_kept = &window.events[1];
    assert_eq!(first_kept.id, 3, "the orphan's action was pulled in");
}

#[test]
fn observation_without_matching_action_is_dropped() {
    let events = vec![
        user_message(0, "go"),
        cmd(1, "a"),
        output(2, 999), // bogus cause, action not in history
        output(3, 999),
        cmd(4, "b"),
        output(5, 4),
    ];
    // mid = 3 → kept = [3,4,5]; first kept is an orphan observation
    let window = apply_conversation_window(&events);
    assert!(window.events.iter().all(|e| e.id != 3));
    assert!(window.events.iter().any(|e| e.id == 4));
}

#[test]
fn empty_history_stays_empty() {
    let window = apply_conversation_window(&[]);
    assert!(window.events.is_empty());
    assert_eq!(window.truncation_id, None);
    assert_eq!(window.start_id, None);
}

#[test]
fn user_message_at_cut_is_kept_and_scan_continues() {
    let events = vec![
        user_message(0, "go"),
        cmd(1, "a"),
        output(2, 1),
        user_message(3, "more context"),
        cmd(4, "b"),
        output(5, 4),
    ];
    // mid = 3 → kept starts with the later user message
    let window = apply_conversation_window(&events);
    assert!(window.events.iter().any(|e| e.id == 3));
    assert!(window.events.iter().any(|e| e.id == 0));
    assert_eq!(window.truncation_id, Some(3));
}
