use cadre_types::Action;

/// Deterministic action source used when replaying a recorded trajectory.
/// While actions remain, it substitutes the agent's LLM-backed step.
#[derive(Debug, Default)]
pub struct ReplayManager {
    actions: Vec<Action>,
    position: usize,
}

impl ReplayManager {
    pub fn new(replay_actions: Option<Vec<Action>>) -> Self {
        let actions = replay_actions.unwrap_or_default();
        if !actions.is_empty() {
            tracing::info!(count = actions.len(), "replay mode enabled");
        }
        Self {
            actions,
            position: 0,
        }
    }

    pub fn should_replay(&self) -> bool {
        self.position < self.actions.len()
    }

    pub fn step(&mut self) -> Option<Action> {
        let action = self.actions.get(self.position).cloned();
        if action.is_some() {
            self.position += 1;
        }
        action
    }
}
