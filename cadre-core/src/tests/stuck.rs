use chrono::Utc;

use cadre_types::{
    Action, ActionKind, Event, EventPayload, EventSource, Observation, ObservationKind,
};

use crate::stuck::StuckDetector;

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

fn cmd(id: i64, command: &str) -> Event {
    event(
        id,
        EventSource::Agent,
        EventPayload::Action(Action::new(ActionKind::CmdRun {
            command: command.into(),
        })),
    )
}

fn output(id: i64, cause: i64, content: &str) -> Event {
    event(
        id,
        EventSource::Environment,
        EventPayload::Observation(
            Observation::new(ObservationKind::CmdOutput { exit_code: 1 }, content)
                .with_cause(cause),
        ),
    )
}

fn error(id: i64, cause: i64, content: &str) -> Event {
    event(
        id,
        EventSource::Agent,
        EventPayload::Observation(Observation::error(content).with_cause(cause)),
    )
}

fn user(id: i64, content: &str) -> Event {
    event(
        id,
        EventSource::User,
        EventPayload::Action(Action::message(content)),
    )
}

#[test]
fn three_identical_pairs_are_stuck() {
    let detector = StuckDetector::default();
    let mut history = vec![user(0, "fix the build")];
    let mut id = 1;
    for _ in 0..3 {
        history.push(cmd(id, "cargo build"));
        history.push(output(id + 1, id, "error[E0308]"));
        id += 2;
    }
    assert!(detector.is_stuck(&history, true));
}

#[test]
fn varied_commands_are_not_stuck() {
    let detector = StuckDetector::default();
    let mut history = vec![user(0, "fix the build")];
    let mut id = 1;
    for i in 0..4 {
        history.push(cmd(id, &format!("cargo build --step {}", i)));
        history.push(output(id + 1, id, "progress"));
        id += 2;
    }
    assert!(!detector.is_stuck(&history, true));
}

#[test]
fn repeated_identical_errors_are_stuck() {
    let detector = StuckDetector::default();
    let history = vec![
        user(0, "run it"),
        cmd(1, "a"),
        error(2, 1, "permission denied"),
        cmd(3, "b"),
        error(4, 3, "permission denied"),
        cmd(5, "c"),
        error(6, 5, "permission denied"),
    ];
    assert!(detector.is_stuck(&history, false));
}

#[test]
fn oscillation_between_two_pairs_is_stuck() {
    let detector = StuckDetector::default();
    let mut history = vec![user(0, "sync the files")];
    let mut id = 1;
    for _ in 0..2 {
        history.push(cmd(id, "push"));
        history.push(output(id + 1, id, "rejected"));
        history.push(cmd(id + 2, "pull"));
        history.push(output(id + 3, id + 2, "conflict"));
        id += 4;
    }
    assert!(detector.is_stuck(&history, true));
}

#[test]
fn a_new_user_message_resets_the_window() {
    let detector = StuckDetector::default();
    let mut history = vec![user(0, "fix the build")];
    let mut id = 1;
    for _ in 0..3 {
        history.push(cmd(id, "cargo build"));
        history.push(output(id + 1, id, "error[E0308]"));
        id += 2;
    }
    // User intervention: only events after it count.
    history.push(user(id, "try a different approach"));
    assert!(!detector.is_stuck(&history, false));
}
