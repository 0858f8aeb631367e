use cadre_types::{CondenserConfig, Event, State};

/// Reduces the event history handed to the LLM. The controller-level
/// truncation handles context overflow; condensers exist for cheaper,
/// eager strategies.
pub trait Condenser: Send + Sync + std::fmt::Debug {
    fn condensed_history(&self, state: &State) -> Vec<Event>;
}

/// Pass the history through unchanged.
#[derive(Debug, Default)]
pub struct NoopCondenser;

impl Condenser for NoopCondenser {
    fn condensed_history(&self, state: &State) -> Vec<Event> {
        state.history.clone()
    }
}

pub fn condenser_from_config(config: &CondenserConfig) -> Box<dyn Condenser> {
    match config {
        CondenserConfig::Noop => Box::new(NoopCondenser),
    }
}
