use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use cadre_types::{
    truncate_content, Action, ActionKind, AgentError, AgentState, ConfirmationStatus, Event,
    EventPayload, EventSource, Observation, ObservationKind, RecallType, State,
    TrafficControlState,
};

use crate::agent::Agent;
use crate::controller::window::apply_conversation_window;
use crate::events::{EventStream, StreamSubscriber};
use crate::stuck::StuckDetector;

pub type StatusCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Options shared by the plan controller and its delegates.
#[derive(Clone, Default)]
pub struct ControllerOptions {
    pub sid: Option<String>,
    pub max_iterations: u64,
    pub max_budget_per_task: Option<f64>,
    pub confirmation_mode: bool,
    pub headless_mode: bool,
    pub initial_state: Option<State>,
    pub status_callback: Option<StatusCallback>,
}

pub(crate) struct Inner {
    pub state: State,
    /// At most one runnable action is in flight per controller; clearing
    /// it requires a matching observation, a confirmation decision, or a
    /// reset.
    pub pending_action: Option<(i64, Action)>,
    pub max_budget_per_task: Option<f64>,
    pub cached_first_user_message: Option<Event>,
}

/// State and behaviour shared by both controller kinds: agent state
/// transitions, traffic control, pending-action bookkeeping, history
/// loading and context-overflow truncation.
pub(crate) struct ControllerCore {
    pub id: String,
    pub subscriber: StreamSubscriber,
    pub agent: Arc<dyn Agent>,
    pub event_stream: Arc<EventStream>,
    pub headless_mode: bool,
    pub initial_max_iterations: u64,
    pub initial_max_budget: Option<f64>,
    pub status_callback: Option<StatusCallback>,
    pub stuck: StuckDetector,
    pub inner: Mutex<Inner>,
    /// Serializes steps: state transitions inside a step are contiguous,
    /// and a second trigger re-checks its guards once the first step is
    /// done.
    pub step_lock: Mutex<()>,
    pub closed: AtomicBool,
}

impl ControllerCore {
    pub fn new(
        subscriber: StreamSubscriber,
        agent: Arc<dyn Agent>,
        event_stream: Arc<EventStream>,
        options: &ControllerOptions,
    ) -> Self {
        let id = options
            .sid
            .clone()
            .unwrap_or_else(|| event_stream.sid().to_string());
        let state = options.initial_state.clone().unwrap_or_else(|| {
            State::new(id.clone(), options.max_iterations, options.confirmation_mode)
        });

        Self {
            id,
            subscriber,
            agent,
            event_stream,
            headless_mode: options.headless_mode,
            initial_max_iterations: options.max_iterations,
            initial_max_budget: options.max_budget_per_task,
            status_callback: options.status_callback.clone(),
            stuck: StuckDetector::default(),
            inner: Mutex::new(Inner {
                state,
                pending_action: None,
                max_budget_per_task: options.max_budget_per_task,
                cached_first_user_message: None,
            }),
            step_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn agent_state(&self) -> AgentState {
        self.inner.lock().await.state.agent_state
    }

    /// Backend event types excluded from history.
    pub fn filtered_out(event: &Event) -> bool {
        match &event.payload {
            EventPayload::Action(action) => matches!(
                action.kind,
                ActionKind::Null | ActionKind::ChangeAgentState { .. } | ActionKind::MarkTask { .. }
            ),
            EventPayload::Observation(observation) => matches!(
                observation.kind,
                ObservationKind::Null
                    | ObservationKind::AgentStateChanged { .. }
                    | ObservationKind::PlanStatus { .. }
            ),
        }
    }

    /// Whether the agent should take a step after this event.
    pub async fn should_step(&self, event: &Event) -> bool {
        match &event.payload {
            EventPayload::Action(action) => match &action.kind {
                ActionKind::CreatePlan { .. } | ActionKind::MarkTask { .. } => false,
                ActionKind::Message { .. } => {
                    event.source == EventSource::User
                        || self.agent_state().await != AgentState::AwaitingUserInput
                }
                _ => false,
            },
            EventPayload::Observation(observation) => match &observation.kind {
                ObservationKind::PlanStatus { .. } | ObservationKind::AgentStateChanged { .. } => {
                    false
                }
                ObservationKind::Null => observation.cause.map(|c| c > 0).unwrap_or(false),
                _ => true,
            },
        }
    }

    pub async fn update_state_before_step(&self) {
        let mut inner = self.inner.lock().await;
        inner.state.iteration += 1;
        inner.state.local_iteration += 1;
        tracing::info!(
            session_id = %self.id,
            level = inner.state.delegate_level,
            local_step = inner.state.local_iteration,
            global_step = inner.state.iteration,
            "STEP"
        );
    }

    /// Sync metrics from the agent after a step, before they are merged
    /// into the session totals on terminal transitions.
    pub async fn update_state_after_step(&self) {
        let metrics = self.agent.llm_metrics();
        self.inner.lock().await.state.local_metrics = metrics;
    }

    /// Iteration and cost caps. Returns true when the step must stop.
    pub async fn check_traffic_control(&self) -> bool {
        let (iteration, max_iterations, cost, budget) = {
            let inner = self.inner.lock().await;
            (
                inner.state.iteration,
                inner.state.max_iterations,
                inner.state.metrics.accumulated_cost
                    + inner.state.local_metrics.accumulated_cost,
                inner.max_budget_per_task,
            )
        };

        let mut stop_step = false;
        if iteration >= max_iterations {
            stop_step = self
                .handle_traffic_control("iteration", iteration as f64, max_iterations as f64)
                .await;
        }
        if let Some(max_budget) = budget {
            if cost > max_budget {
                stop_step = self
                    .handle_traffic_control("budget", cost, max_budget)
                    .await;
            }
        }
        stop_step
    }

    /// Breaching a limit moves `NORMAL → THROTTLING`; headless sessions
    /// abort, interactive ones pause and await user resume. A resume that
    /// armed `PAUSED` lets exactly one breach through.
    async fn handle_traffic_control(
        &self,
        limit_type: &str,
        current_value: f64,
        max_value: f64,
    ) -> bool {
        {
            let mut inner = self.inner.lock().await;
            if inner.state.traffic_control_state == TrafficControlState::Paused {
                tracing::debug!(
                    session_id = %self.id,
                    "hitting traffic control, temporarily resume upon user request"
                );
                inner.state.traffic_control_state = TrafficControlState::Normal;
                return false;
            }
            inner.state.traffic_control_state = TrafficControlState::Throttling;
        }

        let (current_str, max_str) = if limit_type == "iteration" {
            (
                format!("{}", current_value as u64),
                format!("{}", max_value as u64),
            )
        } else {
            (format!("{:.2}", current_value), format!("{:.2}", max_value))
        };
        let message = format!(
            "Current {}: {}, max {}: {}",
            limit_type, current_str, limit_type, max_str
        );

        if self.headless_mode {
            self.react_to_exception(AgentError::Other(format!(
                "Agent reached maximum {} in headless mode. {}",
                limit_type, message
            )))
            .await;
        } else {
            self.set_agent_state_to(AgentState::Paused).await;
            if let Some(callback) = &self.status_callback {
                callback("info", "STATUS$TRAFFIC_CONTROL", &message);
            }
        }
        true
    }

    /// Set the agent state to error (or rate-limited) and surface the
    /// failure through the status callback.
    pub async fn react_to_exception(&self, error: AgentError) {
        if matches!(error, AgentError::RateLimit(_)) {
            self.set_agent_state_to(AgentState::RateLimited).await;
            return;
        }
        self.set_agent_state_to(AgentState::Error).await;
        if let Some(callback) = &self.status_callback {
            let err_id = match &error {
                AgentError::Authentication(_) => "STATUS$ERROR_LLM_AUTHENTICATION",
                AgentError::ServiceUnavailable(_) | AgentError::ApiConnection(_) => {
                    "STATUS$ERROR_LLM_SERVICE_UNAVAILABLE"
                }
                AgentError::InternalServer(_) => "STATUS$ERROR_LLM_INTERNAL_SERVER_ERROR",
                AgentError::BadRequest(msg) if msg.contains("ExceededBudget") => {
                    "STATUS$ERROR_LLM_OUT_OF_CREDITS"
                }
                _ => "",
            };
            callback("error", err_id, &error.to_string());
        }
    }

    /// Updates the agent's state and handles side effects, emitting an
    /// `AgentStateChanged` observation for every transition.
    pub async fn set_agent_state_to(&self, new_state: AgentState) {
        let mut republish: Option<Action> = None;
        let mut do_reset = false;
        {
            let mut inner = self.inner.lock().await;
            let old_state = inner.state.agent_state;
            if new_state == old_state {
                return;
            }
            tracing::info!(
                session_id = %self.id,
                agent = %self.agent.name(),
                ?old_state,
                ?new_state,
                "setting agent state"
            );

            if matches!(new_state, AgentState::Stopped | AgentState::Error) {
                let metrics = self.agent.llm_metrics();
                inner.state.local_metrics = metrics;
                let local = inner.state.local_metrics.clone();
                inner.state.metrics.merge(&local);
                do_reset = true;
            } else if new_state == AgentState::Running
                && old_state == AgentState::Paused
                && inner.state.traffic_control_state == TrafficControlState::Throttling
            {
                // Deliberate user resume: arm a one-shot pass and double
                // the breached budget.
                inner.state.traffic_control_state = TrafficControlState::Paused;
                if !self.headless_mode && inner.state.iteration >= inner.state.max_iterations {
                    inner.state.max_iterations += self.initial_max_iterations;
                }
                if let (Some(max_budget), Some(initial)) =
                    (inner.max_budget_per_task, self.initial_max_budget)
                {
                    let cost = inner.state.metrics.accumulated_cost
                        + inner.state.local_metrics.accumulated_cost;
                    if cost >= max_budget {
                        inner.max_budget_per_task = Some(max_budget + initial);
                    }
                }
            } else if matches!(
                new_state,
                AgentState::UserConfirmed | AgentState::UserRejected
            ) {
                match inner.pending_action.take() {
                    Some((_, mut action)) => {
                        action.thought = String::new();
                        action.confirmation_state =
                            Some(if new_state == AgentState::UserConfirmed {
                                ConfirmationStatus::Confirmed
                            } else {
                                ConfirmationStatus::Rejected
                            });
                        republish = Some(action);
                    }
                    // Nothing pending here: the decision concerns another
                    // controller's action, keep the current state.
                    None => return,
                }
            }

            inner.state.agent_state = new_state;
        }

        if do_reset {
            self.reset().await;
        }
        if let Some(action) = republish {
            let id = self
                .event_stream
                .publish(action.clone(), EventSource::Agent)
                .await;
            self.inner.lock().await.pending_action = Some((id, action));
        }

        self.event_stream
            .publish(
                Observation::new(
                    ObservationKind::AgentStateChanged {
                        agent_state: new_state,
                    },
                    "",
                ),
                EventSource::Environment,
            )
            .await;
    }

    /// Clear the pending action on stop/error. A cleared action that
    /// carried tool-call metadata and never got its observation gets a
    /// synthetic error observation so the history stays well-formed.
    pub async fn reset(&self) {
        let orphan = {
            let mut inner = self.inner.lock().await;
            match inner.pending_action.take() {
                Some((id, action)) => {
                    let metadata = action.tool_call_metadata.clone();
                    match metadata {
                        Some(metadata) => {
                            let already_observed = inner.state.history.iter().any(|e| {
                                e.as_observation()
                                    .and_then(|o| o.tool_call_metadata.as_ref())
                                    == Some(&metadata)
                            });
                            if already_observed {
                                None
                            } else {
                                Some((id, metadata))
                            }
                        }
                        None => None,
                    }
                }
                None => None,
            }
        };

        if let Some((cause, metadata)) = orphan {
            self.event_stream
                .publish(
                    Observation::error("The action has not been executed.")
                        .with_cause(cause)
                        .with_metadata(metadata),
                    EventSource::Agent,
                )
                .await;
        }

        self.agent.reset().await;
    }

    /// Publish an action produced by a step, managing the pending slot
    /// and the optional confirmation gate.
    pub async fn publish_action(&self, mut action: Action) {
        if action.is_null() {
            return;
        }

        let confirmation_mode = {
            let inner = self.inner.lock().await;
            inner.state.confirmation_mode
        };
        if confirmation_mode
            && action.runnable()
            && matches!(
                action.kind,
                ActionKind::CmdRun { .. } | ActionKind::CodeCellRun { .. }
            )
        {
            action.confirmation_state = Some(ConfirmationStatus::AwaitingConfirmation);
        }

        if action.confirmation_state == Some(ConfirmationStatus::AwaitingConfirmation) {
            self.set_agent_state_to(AgentState::AwaitingUserConfirmation)
                .await;
        }

        let runnable = action.runnable();
        let id = self
            .event_stream
            .publish(action.clone(), EventSource::Agent)
            .await;
        if runnable {
            self.inner.lock().await.pending_action = Some((id, action.clone()));
        }
        tracing::debug!(session_id = %self.id, action = %action.describe(), "ACTION");
    }

    /// Handle an observation from the stream: clear a matching pending
    /// action, resolve confirmation outcomes and merge error metrics.
    pub async fn handle_observation(&self, event: &Event) {
        let Some(observation) = event.as_observation() else {
            return;
        };
        tracing::debug!(
            session_id = %self.id,
            content = %truncate_content(&observation.content, 200),
            "OBSERVATION"
        );

        let mut transition: Option<AgentState> = None;
        {
            let mut inner = self.inner.lock().await;
            let matches_pending = inner
                .pending_action
                .as_ref()
                .map(|(id, _)| Some(*id) == observation.cause)
                .unwrap_or(false);
            if matches_pending {
                match inner.state.agent_state {
                    AgentState::AwaitingUserConfirmation => return,
                    AgentState::UserConfirmed => transition = Some(AgentState::Running),
                    AgentState::UserRejected => transition = Some(AgentState::AwaitingUserInput),
                    _ => {}
                }
                inner.pending_action = None;
            } else if observation.is_error() && inner.state.agent_state == AgentState::Error {
                let local = inner.state.local_metrics.clone();
                inner.state.metrics.merge(&local);
            }
        }
        if let Some(state) = transition {
            self.set_agent_state_to(state).await;
        }
    }

    /// Handle a message action: user messages extend the iteration budget
    /// in interactive mode, trigger a knowledge recall and wake the
    /// agent; agent questions park the session on user input.
    pub async fn handle_message_action(&self, event: &Event) {
        let Some(action) = event.as_action() else {
            return;
        };
        let ActionKind::Message {
            content,
            wait_for_response,
            ..
        } = &action.kind
        else {
            return;
        };

        if event.source == EventSource::User {
            tracing::debug!(session_id = %self.id, content = %truncate_content(content, 200), "user message");
            {
                let mut inner = self.inner.lock().await;
                if !self.headless_mode {
                    inner.state.max_iterations =
                        inner.state.iteration + self.initial_max_iterations;
                    if matches!(
                        inner.state.traffic_control_state,
                        TrafficControlState::Throttling | TrafficControlState::Paused
                    ) {
                        inner.state.traffic_control_state = TrafficControlState::Normal;
                    }
                }
            }

            let first = self.first_user_message().await;
            let is_first = first.map(|f| f.id == event.id).unwrap_or(false);
            let recall = Action::new(ActionKind::Recall {
                query: content.clone(),
                recall_type: if is_first {
                    RecallType::WorkspaceContext
                } else {
                    RecallType::Knowledge
                },
            });
            let id = self
                .event_stream
                .publish(recall.clone(), EventSource::User)
                .await;
            self.inner.lock().await.pending_action = Some((id, recall));

            if self.agent_state().await != AgentState::Running {
                self.set_agent_state_to(AgentState::Running).await;
            }
        } else if event.source == EventSource::Agent && *wait_for_response {
            self.set_agent_state_to(AgentState::AwaitingUserInput).await;
        }
    }

    /// First user message inside this controller's window, cached.
    pub async fn first_user_message(&self) -> Option<Event> {
        {
            let inner = self.inner.lock().await;
            if let Some(cached) = &inner.cached_first_user_message {
                return Some(cached.clone());
            }
        }
        let start_id = self.inner.lock().await.state.start_id;
        let found = self
            .event_stream
            .get_events(start_id, None, false, true)
            .await
            .into_iter()
            .find(|e| e.is_message_from(EventSource::User));
        if let Some(found) = &found {
            self.inner.lock().await.cached_first_user_message = Some(found.clone());
        }
        found
    }

    /// Load history from the stream: `[start_id, truncation_id)` keeps
    /// only the first user message, the rest comes from the truncation
    /// point onwards.
    pub async fn init_history(&self) {
        let (mut start_id, end_id, truncation_id) = {
            let inner = self.inner.lock().await;
            (
                inner.state.start_id,
                inner.state.end_id,
                inner.state.truncation_id,
            )
        };
        let end_id = match end_id {
            Some(end) => Some(end),
            None => self.event_stream.latest_id().await,
        };

        let Some(end) = end_id else {
            self.inner.lock().await.state.history = Vec::new();
            return;
        };
        if start_id > end + 1 {
            tracing::warn!(
                session_id = %self.id,
                start_id,
                end,
                "start_id is beyond end_id, history will be empty"
            );
            self.inner.lock().await.state.history = Vec::new();
            return;
        }

        let mut events: Vec<Event> = Vec::new();
        if let Some(truncation_id) = truncation_id {
            if truncation_id > 0 {
                let first_user_msg = self
                    .event_stream
                    .get_events_filtered(start_id, Some(end), true, Self::filtered_out)
                    .await
                    .into_iter()
                    .find(|e| e.is_message_from(EventSource::User));
                if let Some(first_user_msg) = first_user_msg {
                    events.push(first_user_msg);
                }
                start_id = truncation_id;
            }
        }

        events.extend(
            self.event_stream
                .get_events_filtered(start_id, Some(end), true, Self::filtered_out)
                .await,
        );

        let mut inner = self.inner.lock().await;
        inner.state.history = events;
        inner.state.start_id = start_id;
    }

    /// Compress history after a context-window overflow and schedule the
    /// next step via a condensation observation.
    pub async fn handle_long_context_error(&self) {
        {
            let mut inner = self.inner.lock().await;
            let window = apply_conversation_window(&inner.state.history);
            inner.state.history = window.events;
            inner.state.truncation_id = window.truncation_id;
            if let Some(start_id) = window.start_id {
                inner.state.start_id = start_id;
            } else if let Some(first) = inner.state.history.first() {
                inner.state.start_id = first.id;
            }
        }
        self.event_stream
            .publish(
                Observation::new(
                    ObservationKind::Condensation,
                    "Trimming prompt to meet context window limitations",
                ),
                EventSource::Agent,
            )
            .await;
    }

    pub async fn is_stuck(&self) -> bool {
        let inner = self.inner.lock().await;
        self.stuck.is_stuck(&inner.state.history, self.headless_mode)
    }

    /// Rewrite final history, unsubscribe from the stream and mark the
    /// controller closed.
    pub async fn close(&self, set_stop_state: bool) {
        if set_stop_state {
            self.set_agent_state_to(AgentState::Stopped).await;
        }

        let (start_id, end_id) = {
            let inner = self.inner.lock().await;
            (inner.state.start_id.max(0), inner.state.end_id)
        };
        let end_id = match end_id {
            Some(end) => Some(end),
            None => self.event_stream.latest_id().await,
        };
        if let Some(end) = end_id {
            let history = self
                .event_stream
                .get_events_filtered(start_id, Some(end), true, Self::filtered_out)
                .await;
            self.inner.lock().await.state.history = history;
        }

        self.event_stream.unsubscribe(self.subscriber, &self.id);
        self.closed.store(true, Ordering::SeqCst);
    }
}
