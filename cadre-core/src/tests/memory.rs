use chrono::Utc;
use serde_json::json;

use cadre_types::{
    Action, ActionKind, AgentConfig, Event, EventPayload, EventSource, Message, MessageRole,
    Observation, ObservationKind, Part, ToolCallMetadata,
};

use crate::memory::ConversationMemory;
use crate::prompts::PromptManager;

fn memory() -> ConversationMemory {
    ConversationMemory::new(AgentConfig::default(), PromptManager::executor())
}

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

fn metadata(id: &str) -> ToolCallMetadata {
    ToolCallMetadata {
        tool_call_id: id.to_string(),
        function_name: "execute_bash".to_string(),
    }
}

#[test]
fn system_message_comes_first() {
    let memory = memory();
    let history = vec![event(
        0,
        EventSource::User,
        EventPayload::Action(Action::message("hello")),
    )];
    let messages = memory.process_events(&history, memory.initial_messages(false));
    assert_eq!(messages[0].role, MessageRole::System);
    assert_eq!(messages[1].role, MessageRole::User);
    assert_eq!(messages[1].as_text().unwrap(), "hello");
}

#[test]
fn tool_calls_pair_with_their_observations() {
    let memory = memory();
    let action = Action::new(ActionKind::CmdRun {
        command: "ls".into(),
    })
    .with_metadata(metadata("call_1"))
    .with_thought("let me look around");
    let observation = Observation::new(ObservationKind::CmdOutput { exit_code: 0 }, "README.md")
        .with_cause(1)
        .with_metadata(metadata("call_1"));

    let history = vec![
        event(0, EventSource::User, EventPayload::Action(Action::message("list files"))),
        event(1, EventSource::Agent, EventPayload::Action(action)),
        event(2, EventSource::Environment, EventPayload::Observation(observation)),
    ];
    let messages = memory.process_events(&history, memory.initial_messages(false));

    let assistant = messages
        .iter()
        .find(|m| m.role == MessageRole::Assistant)
        .unwrap();
    let calls = assistant.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool_call_id, "call_1");
    assert_eq!(calls[0].input, json!({ "command": "ls" }));

    let tool_index = messages
        .iter()
        .position(|m| m.role == MessageRole::Tool)
        .unwrap();
    assert_eq!(messages[tool_index - 1].role, MessageRole::Assistant);
    let responses = messages[tool_index].tool_responses();
    assert_eq!(responses[0].tool_call_id, "call_1");
}

#[test]
fn dangling_tool_calls_are_dropped() {
    let memory = memory();
    let action = Action::new(ActionKind::CmdRun {
        command: "ls".into(),
    })
    .with_metadata(metadata("call_1"));
    let history = vec![
        event(0, EventSource::User, EventPayload::Action(Action::message("list files"))),
        event(1, EventSource::Agent, EventPayload::Action(action)),
    ];
    let messages = memory.process_events(&history, memory.initial_messages(false));
    assert!(messages.iter().all(|m| m.tool_calls().is_empty()));
    assert!(messages.iter().all(|m| m.role != MessageRole::Tool));
}

#[test]
fn plan_management_actions_stay_visible() {
    let memory = memory();
    let history = vec![
        event(
            0,
            EventSource::Agent,
            EventPayload::Action(Action::new(ActionKind::MarkTask {
                plan_id: "plan_1".into(),
                task_index: 0,
                task_content: "Write code".into(),
                task_status: cadre_types::TaskStatus::Completed,
            })),
        ),
        event(
            1,
            EventSource::User,
            EventPayload::Action(Action::new(ActionKind::AssignTask {
                plan_id: "plan_1".into(),
                task_index: 1,
                task_content: "Write tests".into(),
                delegate_id: "sess_1".into(),
            })),
        ),
    ];
    let messages = memory.process_events(&history, memory.initial_messages(false));

    let assistant = messages
        .iter()
        .find(|m| m.role == MessageRole::Assistant)
        .unwrap();
    assert_eq!(
        assistant.as_text().unwrap(),
        "Marked task 0 as completed: Write code"
    );
    let user = messages
        .iter()
        .rfind(|m| m.role == MessageRole::User)
        .unwrap();
    assert_eq!(
        user.as_text().unwrap(),
        "Assigned task 1 to sess_1: Write tests"
    );
}

#[test]
fn consecutive_same_role_messages_are_joined() {
    let memory = memory();
    let history = vec![
        event(0, EventSource::User, EventPayload::Action(Action::message("first"))),
        event(1, EventSource::User, EventPayload::Action(Action::message("second"))),
        event(
            2,
            EventSource::Agent,
            EventPayload::Action(Action::message("reply one")),
        ),
        event(
            3,
            EventSource::Agent,
            EventPayload::Action(Action::message("reply two")),
        ),
    ];
    let messages = memory.process_events(&history, memory.initial_messages(false));
    // system + one joined user + one joined assistant
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].as_text().unwrap(), "first\n\nsecond");
    assert_eq!(messages[2].as_text().unwrap(), "reply one\n\nreply two");

    for pair in messages.windows(2) {
        assert_ne!(pair[0].role, pair[1].role);
    }
}

#[test]
fn long_observations_are_clipped_with_marker() {
    let mut config = AgentConfig::default();
    config.max_message_chars = 100;
    let memory = ConversationMemory::new(config, PromptManager::executor());

    let big = "x".repeat(500);
    let history = vec![event(
        0,
        EventSource::Environment,
        EventPayload::Observation(Observation::new(
            ObservationKind::CmdOutput { exit_code: 0 },
            big,
        )),
    )];
    let messages = memory.process_events(&history, memory.initial_messages(false));
    let text = messages.last().unwrap().as_text().unwrap();
    assert!(text.contains("truncated"));
    assert!(text.len() < 300);
}

#[test]
fn caching_marks_last_system_and_two_user_messages() {
    let memory = memory();
    let mut messages = vec![
        Message::system("sys"),
        Message::user("one"),
        Message::assistant("a"),
        Message::user("two"),
        Message::assistant("b"),
        Message::user("three"),
    ];
    memory.apply_prompt_caching(&mut messages);
    assert!(messages[0].cache_marker);
    assert!(!messages[1].cache_marker);
    assert!(messages[3].cache_marker);
    assert!(messages[5].cache_marker);
}

#[test]
fn examples_are_prepended_once() {
    let prompts = PromptManager::executor().with_examples("Example: do X then Y");
    let memory = ConversationMemory::new(AgentConfig::default(), prompts);
    let messages = memory.initial_messages(false);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, MessageRole::User);
    assert!(matches!(&messages[1].parts[0], Part::Text(t) if t.contains("Example")));
}
