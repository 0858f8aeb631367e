use std::collections::HashMap;

use serde_json::json;

use cadre_types::{ActionKind, AgentConfig, AgentError, HubTool, ToolCall, ToolDefinition};

use crate::llm::LlmResponse;
use crate::tools::{builtin_tools, merge_tools, response_to_actions};

fn hub_tool(name: &str, external_id: &str) -> HubTool {
    HubTool {
        definition: ToolDefinition::new(name, "from the hub", json!({"type": "object"})),
        external_id: external_id.to_string(),
    }
}

fn call(id: &str, name: &str, input: serde_json::Value) -> ToolCall {
    ToolCall {
        tool_call_id: id.to_string(),
        tool_name: name.to_string(),
        input,
    }
}

#[test]
fn config_gates_optional_tools() {
    let all = builtin_tools(&AgentConfig::default());
    let names: Vec<_> = all.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"execute_bash"));
    assert!(names.contains(&"execute_ipython_cell"));
    assert!(names.contains(&"browser"));

    let mut config = AgentConfig::default();
    config.enable_jupyter = false;
    config.enable_browsing = false;
    config.enable_llm_editor = false;
    let gated = builtin_tools(&config);
    let names: Vec<_> = gated.iter().map(|t| t.name.as_str()).collect();
    assert!(!names.contains(&"execute_ipython_cell"));
    assert!(!names.contains(&"browser"));
    assert!(!names.contains(&"edit_file"));
    assert!(names.contains(&"finish"));
}

#[test]
fn merge_keeps_first_tool_on_duplicate_name() {
    let built_in = builtin_tools(&AgentConfig::default());
    let builtin_count = built_in.len();
    let (merged, external_ids) = merge_tools(
        built_in,
        vec![hub_tool("finish", "fh_finish"), hub_tool("weather", "fh_w")],
    );

    // the hub's `finish` is dropped, the built-in keeps its slot
    assert_eq!(merged.len(), builtin_count + 1);
    let finish = merged.iter().find(|t| t.name == "finish").unwrap();
    assert_ne!(finish.description, "from the hub");
    assert!(!external_ids.contains_key("finish"));
    assert_eq!(external_ids.get("weather").map(String::as_str), Some("fh_w"));

    // names unique, built-ins come before hub results
    let names: Vec<_> = merged.iter().map(|t| t.name.clone()).collect();
    let mut deduped = names.clone();
    deduped.dedup();
    assert_eq!(names, deduped);
    assert_eq!(merged.last().unwrap().name, "weather");
}

#[test]
fn tool_calls_map_to_typed_actions() {
    let tools = builtin_tools(&AgentConfig::default());
    let mut external_ids = HashMap::new();
    external_ids.insert("weather".to_string(), "fh_w".to_string());

    let response = LlmResponse {
        content: "Working on it.".into(),
        tool_calls: vec![
            call("1", "execute_bash", json!({"command": "ls"})),
            call("2", "weather", json!({"city": "Hanoi"})),
            call("3", "finish", json!({"message": "done", "task_completed": true})),
        ],
        usage: None,
    };
    let actions = response_to_actions(&response, &tools, &external_ids).unwrap();
    assert_eq!(actions.len(), 4);

    // content becomes the leading message, not waiting for a response
    match &actions[0].kind {
        ActionKind::Message {
            content,
            wait_for_response,
            ..
        } => {
            assert_eq!(content, "Working on it.");
            assert!(!wait_for_response);
        }
        other => panic!("expected message, got {:?}", other),
    }
    assert!(matches!(&actions[1].kind, ActionKind::CmdRun { command } if command == "ls"));
    match &actions[2].kind {
        ActionKind::ToolCall {
            name, external_id, ..
        } => {
            assert_eq!(name, "weather");
            assert_eq!(external_id.as_deref(), Some("fh_w"));
        }
        other => panic!("expected tool call, got {:?}", other),
    }
    match &actions[3].kind {
        ActionKind::Finish {
            final_thought,
            task_completed,
            ..
        } => {
            assert_eq!(final_thought, "done");
            assert!(task_completed);
        }
        other => panic!("expected finish, got {:?}", other),
    }
    assert_eq!(
        actions[1].tool_call_metadata.as_ref().unwrap().tool_call_id,
        "1"
    );
}

#[test]
fn bare_content_waits_for_the_user() {
    let tools = builtin_tools(&AgentConfig::default());
    let response = LlmResponse {
        content: "Which file should I edit?".into(),
        tool_calls: vec![],
        usage: None,
    };
    let actions = response_to_actions(&response, &tools, &HashMap::new()).unwrap();
    assert_eq!(actions.len(), 1);
    assert!(matches!(
        &actions[0].kind,
        ActionKind::Message {
            wait_for_response: true,
            ..
        }
    ));
}

#[test]
fn unknown_tool_is_an_error() {
    let tools = builtin_tools(&AgentConfig::default());
    let response = LlmResponse {
        content: String::new(),
        tool_calls: vec![call("1", "rm_rf_everything", json!({}))],
        usage: None,
    };
    let err = response_to_actions(&response, &tools, &HashMap::new()).unwrap_err();
    assert!(matches!(err, AgentError::FunctionCallNotExists(_)));
}

#[test]
fn invalid_arguments_fail_validation() {
    let tools = builtin_tools(&AgentConfig::default());
    let response = LlmResponse {
        content: String::new(),
        tool_calls: vec![call("1", "execute_bash", json!({}))],
        usage: None,
    };
    let err = response_to_actions(&response, &tools, &HashMap::new()).unwrap_err();
    assert!(matches!(err, AgentError::FunctionCallValidation(_)));
}

#[test]
fn empty_response_is_no_action() {
    let tools = builtin_tools(&AgentConfig::default());
    let response = LlmResponse::default();
    let err = response_to_actions(&response, &tools, &HashMap::new()).unwrap_err();
    assert!(matches!(err, AgentError::NoAction(_)));
}

#[test]
fn think_becomes_a_message() {
    let tools = builtin_tools(&AgentConfig::default());
    let response = LlmResponse {
        content: String::new(),
        tool_calls: vec![call("1", "think", json!({"thought": "ponder first"}))],
        usage: None,
    };
    let actions = response_to_actions(&response, &tools, &HashMap::new()).unwrap();
    assert!(matches!(
        &actions[0].kind,
        ActionKind::Message { content, wait_for_response: false, .. } if content == "ponder first"
    ));
    assert!(!actions[0].runnable());
}
