use std::sync::{Arc, Weak};

use cadre_types::{
    Action, ActionKind, AgentError, AgentState, Event, EventPayload, EventSource, Observation,
    State,
};

use crate::agent::Agent;
use crate::controller::core::{ControllerCore, ControllerOptions};
use crate::events::{EventHandler, EventStream, StreamSubscriber};

/// Delegate controller driving the executor agent through one task.
///
/// It borrows the session's event stream but owns its own state; the
/// history window starts after the event that spawned it, so the
/// delegate only ever sees its slice of the stream.
pub struct TaskController {
    core: ControllerCore,
    weak: Weak<TaskController>,
}

impl TaskController {
    pub async fn new(
        agent: Arc<dyn Agent>,
        event_stream: Arc<EventStream>,
        mut options: ControllerOptions,
    ) -> Arc<Self> {
        let start_id = event_stream.latest_id().await.map(|id| id + 1).unwrap_or(0);
        let sid = options
            .sid
            .clone()
            .unwrap_or_else(|| format!("{}-delegate", event_stream.sid()));
        let mut state = State::new(
            sid.clone(),
            options.max_iterations,
            options.confirmation_mode,
        );
        state.start_id = start_id;
        state.delegate_level = 1;
        options.initial_state = Some(state);
        options.sid = Some(sid.clone());

        let controller = Arc::new_cyclic(|weak| Self {
            core: ControllerCore::new(
                StreamSubscriber::TaskController,
                agent,
                event_stream.clone(),
                &options,
            ),
            weak: weak.clone(),
        });
        controller.core.init_history().await;
        event_stream.subscribe(StreamSubscriber::TaskController, controller.clone(), sid);
        controller
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub async fn agent_state(&self) -> AgentState {
        self.core.agent_state().await
    }

    pub async fn set_agent_state_to(&self, state: AgentState) {
        self.core.set_agent_state_to(state).await;
    }

    pub async fn state(&self) -> State {
        self.core.inner.lock().await.state.clone()
    }

    pub async fn close(&self, set_stop_state: bool) {
        self.core.close(set_stop_state).await;
    }

    fn step(&self) {
        let Some(this) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            this.step_with_exception_handling().await;
        });
    }

    async fn step_with_exception_handling(&self) {
        if let Err(e) = self.do_step().await {
            tracing::error!(session_id = %self.core.id, error = %e, "error while running the delegate");
            self.core.react_to_exception(e).await;
        }
    }

    async fn do_step(&self) -> Result<(), AgentError> {
        let _step_guard = self.core.step_lock.lock().await;
        if self.core.is_closed() {
            return Ok(());
        }
        if self.core.agent_state().await != AgentState::Running {
            return Ok(());
        }
        if self.core.inner.lock().await.pending_action.is_some() {
            return Ok(());
        }
        if self.core.check_traffic_control().await {
            tracing::warn!(session_id = %self.core.id, "stopping delegate due to traffic control");
            return Ok(());
        }
        if self.core.is_stuck().await {
            self.core
                .react_to_exception(AgentError::StuckInLoop("Agent got stuck in a loop".into()))
                .await;
            return Ok(());
        }

        self.core.update_state_before_step().await;

        let step_result = {
            let mut inner = self.core.inner.lock().await;
            self.core.agent.step(&mut inner.state).await
        };
        let action = match step_result {
            Ok(action) => action,
            Err(e) if e.is_recoverable_model_error() => {
                self.core
                    .event_stream
                    .publish(Observation::error(e.to_string()), EventSource::Agent)
                    .await;
                return Ok(());
            }
            Err(e) if e.is_context_window_error() => {
                if self.core.agent.config().enable_history_truncation {
                    self.core.handle_long_context_error().await;
                    return Ok(());
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        self.core.publish_action(action).await;
        self.core.update_state_after_step().await;
        Ok(())
    }

    async fn handle_action(&self, event: &Event, action: &Action) {
        match &action.kind {
            ActionKind::ChangeAgentState { agent_state } => {
                self.core.set_agent_state_to(*agent_state).await;
                if *agent_state == AgentState::Running {
                    self.step();
                }
            }
            ActionKind::Message { .. } => {
                self.core.handle_message_action(event).await;
            }
            ActionKind::Finish { outputs, .. } => {
                {
                    let mut inner = self.core.inner.lock().await;
                    inner.state.outputs = outputs.clone();
                    let local = inner.state.local_metrics.clone();
                    inner.state.metrics.merge(&local);
                }
                self.core.set_agent_state_to(AgentState::Finished).await;
            }
            ActionKind::Reject { outputs } => {
                {
                    let mut inner = self.core.inner.lock().await;
                    inner.state.outputs = outputs.clone();
                    let local = inner.state.local_metrics.clone();
                    inner.state.metrics.merge(&local);
                }
                self.core.set_agent_state_to(AgentState::Rejected).await;
            }
            _ => {}
        }
    }
}

#[async_trait::async_trait]
impl EventHandler for TaskController {
    async fn on_event(&self, event: Event) {
        if self.core.is_closed() || event.hidden {
            return;
        }

        if !ControllerCore::filtered_out(&event) {
            let mut inner = self.core.inner.lock().await;
            if event.id >= inner.state.start_id {
                inner.state.history.push(event.clone());
            }
        }

        match &event.payload {
            EventPayload::Action(action) => {
                let action = action.clone();
                self.handle_action(&event, &action).await;
            }
            EventPayload::Observation(_) => {
                self.core.handle_observation(&event).await;
            }
        }

        if self.core.should_step(&event).await {
            self.step();
        }
    }
}
