use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use cadre_types::{
    Action, ActionKind, AgentConfig, AgentState, ConfirmationStatus, EventSource, Observation,
    ObservationKind, State, TaskStatus,
};

use crate::agent::{ExecutorAgent, PlannerAgent, DEFAULT_PLAN_STEPS};
use crate::controller::{ControllerOptions, PlanController};
use crate::events::EventStream;
use crate::memory::RecallMemory;
use crate::prompts::PromptManager;
use crate::tests::mock_llm::{
    cmd_response, finish_response, plan_create_response, text_response, MockLlm, Scripted,
};
use crate::tests::runtime::MockRuntime;

struct Session {
    stream: Arc<EventStream>,
    controller: Arc<PlanController>,
    planner_llm: Arc<MockLlm>,
    executor_llm: Arc<MockLlm>,
}

async fn build_session(
    planner_script: Vec<Scripted>,
    executor_script: Vec<Scripted>,
    options: ControllerOptions,
    with_runtime: bool,
) -> Session {
    let stream = Arc::new(EventStream::new("sess"));
    RecallMemory::new(stream.clone()).attach("memory");
    if with_runtime {
        MockRuntime::attach(stream.clone());
    }

    let planner_llm = Arc::new(MockLlm::new(planner_script));
    let executor_llm = Arc::new(MockLlm::new(executor_script));
    let planner = Arc::new(PlannerAgent::new(
        "planner",
        AgentConfig::default(),
        planner_llm.clone(),
        PromptManager::planner(),
    ));
    let executor = Arc::new(ExecutorAgent::new(
        "executor",
        AgentConfig::default(),
        executor_llm.clone(),
        None,
        PromptManager::executor(),
    ));

    let controller = PlanController::new(planner, executor, stream.clone(), options, None).await;
    Session {
        stream,
        controller,
        planner_llm,
        executor_llm,
    }
}

fn default_options() -> ControllerOptions {
    ControllerOptions {
        sid: Some("sess".to_string()),
        max_iterations: 100,
        headless_mode: true,
        ..Default::default()
    }
}

async fn wait_for(
    controller: &PlanController,
    states: &[AgentState],
    timeout: Duration,
) -> AgentState {
    tokio::time::timeout(timeout, controller.wait_for(states))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", states))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_path_runs_every_task_to_completion() {
    let session = build_session(
        vec![plan_create_response(
            "p-1",
            "plan_1",
            "Build a TODO CLI",
            &["Design data model", "Implement CLI", "Write README"],
        )],
        vec![
            cmd_response("c-1", "touch model.rs"),
            finish_response("f-1", "task done"),
            cmd_response("c-2", "touch cli.rs"),
            finish_response("f-2", "task done"),
            cmd_response("c-3", "touch README.md"),
            finish_response("f-3", "task done"),
        ],
        default_options(),
        true,
    )
    .await;

    session
        .stream
        .publish(Action::message("Build a TODO CLI"), EventSource::User)
        .await;

    let end = wait_for(
        &session.controller,
        &[AgentState::Finished, AgentState::Error],
        Duration::from_secs(30),
    )
    .await;
    assert_eq!(end, AgentState::Finished);

    let state: State = session.controller.state().await;
    let plan = state.plans.get("plan_1").expect("plan registered");
    assert_eq!(plan.tasks.len(), 3);
    assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert!(plan
        .tasks
        .iter()
        .all(|t| t.result.as_deref() == Some("task done")));
    assert_eq!(state.current_task_index, 2);
    assert_eq!(state.active_plan_id.as_deref(), Some("plan_1"));

    // every delegate was torn down after its task completed
    assert_eq!(session.controller.delegate_count().await, 0);

    // planner: create + finalize; executor: two calls per task
    assert_eq!(session.planner_llm.call_count(), 2);
    assert_eq!(session.executor_llm.call_count(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_create_call_falls_back_to_default_plan() {
    let session = build_session(
        vec![text_response("Let me think about this request.")],
        vec![],
        default_options(),
        true,
    )
    .await;

    session
        .stream
        .publish(Action::message("Do something useful"), EventSource::User)
        .await;

    // All delegates finish immediately, then the planner's queued message
    // asks for user input.
    let end = wait_for(
        &session.controller,
        &[AgentState::AwaitingUserInput, AgentState::Error],
        Duration::from_secs(30),
    )
    .await;
    assert_eq!(end, AgentState::AwaitingUserInput);

    let state = session.controller.state().await;
    let plan = state
        .plans
        .values()
        .next()
        .expect("default plan registered");
    assert!(plan.title.starts_with("Plan for: Do something useful"));
    let steps: Vec<_> = plan.tasks.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(steps, DEFAULT_PLAN_STEPS.to_vec());
    assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Completed));

    // a follow-up message resumes the session and the planner finalises
    session
        .stream
        .publish(Action::message("looks good, wrap it up"), EventSource::User)
        .await;
    let end = wait_for(
        &session.controller,
        &[AgentState::Finished, AgentState::Error],
        Duration::from_secs(30),
    )
    .await;
    assert_eq!(end, AgentState::Finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn context_overflow_truncates_history_and_continues() {
    let session = build_session(
        vec![
            Scripted::ContextOverflow,
            plan_create_response("p-1", "plan_1", "Small plan", &["Only step"]),
        ],
        vec![],
        default_options(),
        true,
    )
    .await;

    session
        .stream
        .publish(Action::message("Summarise the repo"), EventSource::User)
        .await;

    let end = wait_for(
        &session.controller,
        &[AgentState::Finished, AgentState::Error],
        Duration::from_secs(30),
    )
    .await;
    assert_eq!(end, AgentState::Finished);

    let state = session.controller.state().await;
    assert!(state.truncation_id.is_some(), "truncation id was recorded");
    assert!(state.plans.contains_key("plan_1"));

    // the first user message survived the cut exactly once
    let first_user_count = state
        .history
        .iter()
        .filter(|e| e.is_message_from(EventSource::User) && e.id == 0)
        .count();
    assert_eq!(first_user_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn iteration_breach_in_headless_mode_errors_out() {
    let options = ControllerOptions {
        sid: Some("sess".to_string()),
        max_iterations: 0,
        headless_mode: true,
        ..Default::default()
    };
    let session = build_session(vec![], vec![], options, true).await;

    session
        .stream
        .publish(Action::message("anything"), EventSource::User)
        .await;

    let end = wait_for(
        &session.controller,
        &[AgentState::Error],
        Duration::from_secs(30),
    )
    .await;
    assert_eq!(end, AgentState::Error);
    let state = session.controller.state().await;
    assert_eq!(
        state.traffic_control_state,
        cadre_types::TrafficControlState::Throttling
    );
    // the breach fired before any LLM call
    assert_eq!(session.planner_llm.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interactive_resume_doubles_the_iteration_budget() {
    let mut initial = State::new("sess", 5, false);
    initial.iteration = 5;
    initial.agent_state = AgentState::Running;
    let options = ControllerOptions {
        sid: Some("sess".to_string()),
        max_iterations: 5,
        headless_mode: false,
        initial_state: Some(initial),
        ..Default::default()
    };
    let session = build_session(vec![], vec![], options, true).await;

    // any observation triggers a step, which hits the cap and pauses
    session
        .stream
        .publish(
            Observation::new(ObservationKind::CmdOutput { exit_code: 0 }, "tick"),
            EventSource::Environment,
        )
        .await;
    let end = wait_for(
        &session.controller,
        &[AgentState::Paused, AgentState::Error],
        Duration::from_secs(30),
    )
    .await;
    assert_eq!(end, AgentState::Paused);

    // user resume: budget doubles and the planner proceeds to finish
    session
        .stream
        .publish(
            Action::new(ActionKind::ChangeAgentState {
                agent_state: AgentState::Running,
            }),
            EventSource::User,
        )
        .await;
    let end = wait_for(
        &session.controller,
        &[AgentState::Finished, AgentState::Error],
        Duration::from_secs(30),
    )
    .await;
    assert_eq!(end, AgentState::Finished);
    let state = session.controller.state().await;
    assert_eq!(state.max_iterations, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn confirmation_mode_gates_shell_actions() {
    let options = ControllerOptions {
        sid: Some("sess".to_string()),
        max_iterations: 100,
        confirmation_mode: true,
        headless_mode: true,
        ..Default::default()
    };
    let session = build_session(
        vec![plan_create_response("p-1", "plan_1", "One step", &["Run it"])],
        vec![
            cmd_response("c-1", "rm -r build"),
            finish_response("f-1", "cleaned"),
        ],
        options,
        true,
    )
    .await;

    session
        .stream
        .publish(Action::message("clean the build dir"), EventSource::User)
        .await;

    // wait until the command is parked awaiting confirmation
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let events = session.stream.get_events(0, None, false, false).await;
        let parked = events.iter().any(|e| {
            e.as_action()
                .map(|a| {
                    a.confirmation_state == Some(ConfirmationStatus::AwaitingConfirmation)
                        && matches!(a.kind, ActionKind::CmdRun { .. })
                })
                .unwrap_or(false)
        });
        if parked {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "command never parked");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    session
        .stream
        .publish(
            Action::new(ActionKind::ChangeAgentState {
                agent_state: AgentState::UserConfirmed,
            }),
            EventSource::User,
        )
        .await;

    let end = wait_for(
        &session.controller,
        &[AgentState::Finished, AgentState::Error],
        Duration::from_secs(30),
    )
    .await;
    assert_eq!(end, AgentState::Finished);

    // the command appears twice: once parked, once confirmed
    let events = session.stream.get_events(0, None, false, false).await;
    let runs: Vec<_> = events
        .iter()
        .filter(|e| {
            e.as_action()
                .map(|a| matches!(a.kind, ActionKind::CmdRun { .. }))
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(runs.len(), 2);
    assert_eq!(
        runs[1].as_action().unwrap().confirmation_state,
        Some(ConfirmationStatus::Confirmed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replayed_actions_substitute_the_planner() {
    let stream = Arc::new(EventStream::new("sess"));
    RecallMemory::new(stream.clone()).attach("memory");
    MockRuntime::attach(stream.clone());

    let planner_llm = Arc::new(MockLlm::new(vec![]));
    let executor_llm = Arc::new(MockLlm::new(vec![]));
    let planner = Arc::new(PlannerAgent::new(
        "planner",
        AgentConfig::default(),
        planner_llm.clone(),
        PromptManager::planner(),
    ));
    let executor = Arc::new(ExecutorAgent::new(
        "executor",
        AgentConfig::default(),
        executor_llm.clone(),
        None,
        PromptManager::executor(),
    ));

    let replay = vec![Action::new(ActionKind::CreatePlan {
        plan_id: "replayed".to_string(),
        title: "Recorded plan".to_string(),
        steps: vec!["Do it".to_string()],
    })];
    let controller = PlanController::new(
        planner,
        executor,
        stream.clone(),
        default_options(),
        Some(replay),
    )
    .await;

    stream
        .publish(Action::message("run the recording"), EventSource::User)
        .await;

    let end = wait_for(
        &controller,
        &[AgentState::Finished, AgentState::Error],
        Duration::from_secs(30),
    )
    .await;
    assert_eq!(end, AgentState::Finished);

    let state = controller.state().await;
    let plan = state.plans.get("replayed").expect("replayed plan exists");
    assert_eq!(plan.title, "Recorded plan");
    assert!(plan.is_resolved());
    // the planner LLM was only consulted for the finalisation step
    assert_eq!(planner_llm.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_with_an_unanswered_action_emits_a_synthetic_error() {
    // no runtime: the delegate's command never gets an observation
    let session = build_session(
        vec![plan_create_response("p-1", "plan_1", "One step", &["Run it"])],
        vec![cmd_response("c-1", "sleep 3600")],
        default_options(),
        false,
    )
    .await;

    session
        .stream
        .publish(Action::message("run the long job"), EventSource::User)
        .await;

    // wait for the command to be in flight
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let events = session.stream.get_events(0, None, false, false).await;
        if events.iter().any(|e| {
            e.as_action()
                .map(|a| matches!(a.kind, ActionKind::CmdRun { .. }))
                .unwrap_or(false)
        }) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "command never published");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    session
        .stream
        .publish(
            Action::new(ActionKind::ChangeAgentState {
                agent_state: AgentState::Stopped,
            }),
            EventSource::User,
        )
        .await;

    // the delegate's reset publishes the placeholder observation
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let events = session.stream.get_events(0, None, false, false).await;
        let found = events.iter().any(|e| {
            e.as_observation()
                .map(|o| {
                    o.is_error()
                        && o.content == "The action has not been executed."
                        && o.tool_call_metadata.is_some()
                })
                .unwrap_or(false)
        });
        if found {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "synthetic error observation never published"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
