use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Local;
use serde_json::Value;
use tokio::sync::Mutex;

use cadre_types::{
    Action, ActionKind, AgentError, AgentState, Event, EventPayload, EventSource, Observation,
    Plan, State, TaskStatus,
};

use crate::agent::Agent;
use crate::controller::core::{ControllerCore, ControllerOptions};
use crate::controller::task::TaskController;
use crate::events::{EventHandler, EventStream, StreamSubscriber};
use crate::replay::ReplayManager;

pub const FINALIZE_PLAN_PROMPT: &str =
    "All tasks are completed. Please accomplish the plan and send it to the user.";

/// Top-level controller: owns the session state and the plan store
/// projection, schedules the planning agent, and spawns one delegate
/// controller per in-progress task.
pub struct PlanController {
    core: ControllerCore,
    executor_agent: Arc<dyn Agent>,
    replay: Mutex<ReplayManager>,
    /// plan id -> task index -> delegate; at most one delegate per task.
    task_controllers: Mutex<HashMap<String, HashMap<usize, Arc<TaskController>>>>,
    weak: Weak<PlanController>,
}

impl PlanController {
    pub async fn new(
        planning_agent: Arc<dyn Agent>,
        executor_agent: Arc<dyn Agent>,
        event_stream: Arc<EventStream>,
        options: ControllerOptions,
        replay_actions: Option<Vec<Action>>,
    ) -> Arc<Self> {
        let controller = Arc::new_cyclic(|weak| Self {
            core: ControllerCore::new(
                StreamSubscriber::PlanController,
                planning_agent,
                event_stream.clone(),
                &options,
            ),
            executor_agent,
            replay: Mutex::new(ReplayManager::new(replay_actions)),
            task_controllers: Mutex::new(HashMap::new()),
            weak: weak.clone(),
        });
        controller.core.init_history().await;
        event_stream.subscribe(
            StreamSubscriber::PlanController,
            controller.clone(),
            controller.core.id.clone(),
        );
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

    /// Snapshot of the session state.
    pub async fn state(&self) -> State {
        self.core.inner.lock().await.state.clone()
    }

    /// Poll until the controller reaches one of the given states.
    pub async fn wait_for(&self, end_states: &[AgentState]) -> AgentState {
        loop {
            let current = self.agent_state().await;
            if end_states.contains(&current) {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Close the controller and all live delegates, rewriting the final
    /// history.
    pub async fn close(&self, set_stop_state: bool) {
        {
            let mut controllers = self.task_controllers.lock().await;
            for (_, tasks) in controllers.drain() {
                for (_, delegate) in tasks {
                    delegate.close(false).await;
                }
            }
        }
        self.core.close(set_stop_state).await;
    }

    /// Serialised final history; only valid once the controller closed.
    pub async fn get_trajectory(&self) -> Result<Vec<Value>, AgentError> {
        if !self.core.is_closed() {
            return Err(AgentError::Session(
                "trajectory is only available after the controller is closed".into(),
            ));
        }
        let inner = self.core.inner.lock().await;
        inner
            .state
            .history
            .iter()
            .map(|e| serde_json::to_value(e).map_err(AgentError::from))
            .collect()
    }

    /// Number of live delegates across all plans.
    pub async fn delegate_count(&self) -> usize {
        let controllers = self.task_controllers.lock().await;
        controllers.values().map(|tasks| tasks.len()).sum()
    }

    /// True while any delegate is actively resolving a task.
    async fn awaiting_task_resolving(&self) -> bool {
        let controllers = self.task_controllers.lock().await;
        for tasks in controllers.values() {
            for delegate in tasks.values() {
                if delegate.agent_state().await == AgentState::Running {
                    return true;
                }
            }
        }
        false
    }

    /// Events appended to the planner's history even while a delegate is
    /// running.
    fn pass_through(event: &Event) -> bool {
        matches!(
            event.as_action().map(|a| &a.kind),
            Some(ActionKind::Finish { .. }) | Some(ActionKind::AssignTask { .. })
        )
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
            tracing::error!(
                session_id = %self.core.id,
                error = %e,
                "error while running the agent"
            );
            self.core.react_to_exception(e).await;
        }
    }

    /// One step of the planning agent, guarded by delegation, pending
    /// actions, traffic control and stuck detection.
    async fn do_step(&self) -> Result<(), AgentError> {
        let _step_guard = self.core.step_lock.lock().await;
        if self.core.is_closed() || self.awaiting_task_resolving().await {
            return Ok(());
        }
        if self.core.agent_state().await != AgentState::Running {
            return Ok(());
        }
        if self.core.inner.lock().await.pending_action.is_some() {
            return Ok(());
        }
        if self.core.check_traffic_control().await {
            tracing::warn!(session_id = %self.core.id, "stopping agent due to traffic control");
            return Ok(());
        }
        if self.core.is_stuck().await {
            self.core
                .react_to_exception(AgentError::StuckInLoop("Agent got stuck in a loop".into()))
                .await;
            return Ok(());
        }

        self.core.update_state_before_step().await;

        let replayed = {
            let mut replay = self.replay.lock().await;
            if replay.should_replay() {
                replay.step()
            } else {
                None
            }
        };

        let action = match replayed {
            Some(action) => action,
            None => {
                let step_result = {
                    let mut inner = self.core.inner.lock().await;
                    self.core.agent.step(&mut inner.state).await
                };
                match step_result {
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
                }
            }
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
            ActionKind::CreatePlan {
                plan_id,
                title,
                steps,
            } => {
                self.handle_create_plan(plan_id, title, steps.clone()).await;
            }
            ActionKind::MarkTask {
                plan_id,
                task_index,
                task_status,
                ..
            } => {
                self.handle_mark_task(plan_id, *task_index, *task_status)
                    .await;
            }
            ActionKind::AssignTask {
                plan_id,
                task_index,
                delegate_id,
                ..
            } => {
                self.assign_task_to_delegate(plan_id, *task_index, delegate_id)
                    .await;
            }
            ActionKind::Finish {
                final_thought,
                outputs,
                ..
            } => {
                self.handle_finish(final_thought, outputs).await;
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

    /// Register the plan, make it active, and kick off its first task.
    async fn handle_create_plan(&self, plan_id: &str, title: &str, steps: Vec<String>) {
        let first_task = {
            let mut inner = self.core.inner.lock().await;
            let mut plan = Plan::new(plan_id, title, steps);
            let first_task = plan.tasks.first().map(|t| t.content.clone());
            if let Some(task) = plan.tasks.first_mut() {
                task.status = TaskStatus::InProgress;
            }
            inner.state.plans.insert(plan_id.to_string(), plan);
            inner.state.active_plan_id = Some(plan_id.to_string());
            inner.state.current_task_index = 0;
            first_task
        };

        let Some(task_content) = first_task else {
            tracing::warn!(session_id = %self.core.id, %plan_id, "created plan has no tasks");
            return;
        };
        self.core
            .event_stream
            .publish(
                Action::new(ActionKind::MarkTask {
                    plan_id: plan_id.to_string(),
                    task_index: 0,
                    task_content,
                    task_status: TaskStatus::InProgress,
                }),
                EventSource::Agent,
            )
            .await;
    }

    /// Keep the state projection in sync; an `IN_PROGRESS` mark assigns
    /// the task to a fresh delegate.
    async fn handle_mark_task(&self, plan_id: &str, task_index: usize, task_status: TaskStatus) {
        let assignment = {
            let mut inner = self.core.inner.lock().await;
            let Some(plan) = inner.state.plans.get_mut(plan_id) else {
                tracing::warn!(session_id = %self.core.id, %plan_id, "mark task for unknown plan");
                return;
            };
            let Some(task) = plan.tasks.get_mut(task_index) else {
                tracing::warn!(session_id = %self.core.id, task_index, "mark task out of range");
                return;
            };
            task.status = task_status;
            let content = task.content.clone();
            if task_status == TaskStatus::InProgress {
                inner.state.current_task_index = task_index;
                Some(content)
            } else {
                None
            }
        };

        if let Some(task_content) = assignment {
            self.core
                .event_stream
                .publish(
                    Action::new(ActionKind::AssignTask {
                        plan_id: plan_id.to_string(),
                        task_index,
                        task_content,
                        delegate_id: format!("{}_{}", self.core.id, task_index),
                    }),
                    EventSource::User,
                )
                .await;
        }
    }

    /// Spawn the delegate controller for a task and publish its kickoff
    /// prompt. Refuses a second delegate for an active entry.
    async fn assign_task_to_delegate(&self, plan_id: &str, task_index: usize, delegate_id: &str) {
        {
            let controllers = self.task_controllers.lock().await;
            if controllers
                .get(plan_id)
                .map(|tasks| tasks.contains_key(&task_index))
                .unwrap_or(false)
            {
                tracing::warn!(
                    session_id = %self.core.id,
                    %plan_id,
                    task_index,
                    "delegate already active for task, refusing to spawn another"
                );
                return;
            }
        }

        let (options, prompt) = {
            let inner = self.core.inner.lock().await;
            let Some(plan) = inner.state.plans.get(plan_id) else {
                tracing::warn!(session_id = %self.core.id, %plan_id, "assign task for unknown plan");
                return;
            };
            let Some(task) = plan.tasks.get(task_index) else {
                tracing::warn!(session_id = %self.core.id, task_index, "assign task out of range");
                return;
            };
            let options = ControllerOptions {
                sid: Some(delegate_id.to_string()),
                max_iterations: std::cmp::max(1, inner.state.max_iterations / 2),
                max_budget_per_task: inner.max_budget_per_task,
                confirmation_mode: inner.state.confirmation_mode,
                headless_mode: false,
                initial_state: None,
                status_callback: self.core.status_callback.clone(),
            };
            let prompt = format!(
                "CURRENT PLAN STATUS:\n{}\n\nYOUR CURRENT TASK:\nYou are now working on task {}: \"{}\".\nPlease make it done in as few steps as possible (preferably in max 5 steps).\nKnow that current time is {}.",
                plan.render(true),
                task_index,
                task.content,
                Local::now().format("%Y-%m-%d %H:%M:%S"),
            );
            (options, prompt)
        };

        let delegate =
            TaskController::new(self.executor_agent.clone(), self.core.event_stream.clone(), options)
                .await;
        // The delegate starts running before the kickoff prompt lands so
        // the planner sees the task as being resolved.
        delegate.set_agent_state_to(AgentState::Running).await;
        self.task_controllers
            .lock()
            .await
            .entry(plan_id.to_string())
            .or_default()
            .insert(task_index, delegate);

        let mut message = Action::message(prompt);
        if let ActionKind::Message { displayable, .. } = &mut message.kind {
            *displayable = false;
        }
        self.core
            .event_stream
            .publish(message, EventSource::User)
            .await;
    }

    /// A `Finish` either comes from the planner (all tasks resolved, the
    /// session is done) or from a delegate (complete the task, advance
    /// the plan or ask the planner to finalise).
    async fn handle_finish(&self, final_thought: &str, outputs: &Value) {
        let all_resolved = {
            let inner = self.core.inner.lock().await;
            inner
                .state
                .active_plan()
                .map(|p| p.is_resolved())
                .unwrap_or(true)
        };

        if all_resolved {
            {
                let mut inner = self.core.inner.lock().await;
                inner.state.outputs = outputs.clone();
                let local = inner.state.local_metrics.clone();
                inner.state.metrics.merge(&local);
            }
            self.core.set_agent_state_to(AgentState::Finished).await;
            return;
        }

        // Delegate completion: mark the task, store its result, tear the
        // delegate down and advance.
        let (plan_id, task_index, completed_content, next) = {
            let mut inner = self.core.inner.lock().await;
            let Some(plan_id) = inner.state.active_plan_id.clone() else {
                return;
            };
            let task_index = inner.state.current_task_index;
            let (completed_content, next) = {
                let Some(plan) = inner.state.plans.get_mut(&plan_id) else {
                    return;
                };
                let Some(task) = plan.tasks.get_mut(task_index) else {
                    return;
                };
                task.status = TaskStatus::Completed;
                task.result = Some(final_thought.to_string());
                let completed_content = task.content.clone();

                let next = if task_index + 1 < plan.tasks.len() {
                    let next_task = &mut plan.tasks[task_index + 1];
                    next_task.status = TaskStatus::InProgress;
                    Some((task_index + 1, next_task.content.clone()))
                } else {
                    None
                };
                (completed_content, next)
            };
            if next.is_some() {
                inner.state.current_task_index = task_index + 1;
            }
            (plan_id, task_index, completed_content, next)
        };

        self.core
            .event_stream
            .publish(
                Action::new(ActionKind::MarkTask {
                    plan_id: plan_id.clone(),
                    task_index,
                    task_content: completed_content,
                    task_status: TaskStatus::Completed,
                }),
                EventSource::Agent,
            )
            .await;

        let removed = {
            let mut controllers = self.task_controllers.lock().await;
            controllers
                .get_mut(&plan_id)
                .and_then(|tasks| tasks.remove(&task_index))
        };
        if let Some(delegate) = removed {
            delegate.close(false).await;
        }

        match next {
            Some((next_index, next_content)) => {
                self.core
                    .event_stream
                    .publish(
                        Action::new(ActionKind::MarkTask {
                            plan_id,
                            task_index: next_index,
                            task_content: next_content,
                            task_status: TaskStatus::InProgress,
                        }),
                        EventSource::Agent,
                    )
                    .await;
            }
            None => {
                self.core
                    .event_stream
                    .publish(Action::message(FINALIZE_PLAN_PROMPT), EventSource::User)
                    .await;
            }
        }
    }
}

#[async_trait::async_trait]
impl EventHandler for PlanController {
    async fn on_event(&self, event: Event) {
        if self.core.is_closed() || event.hidden {
            return;
        }

        if !ControllerCore::filtered_out(&event) {
            let append = !self.awaiting_task_resolving().await || Self::pass_through(&event);
            if append {
                self.core.inner.lock().await.state.history.push(event.clone());
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
