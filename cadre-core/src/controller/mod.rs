mod core;
mod plan;
mod task;
mod window;

pub use self::core::{ControllerOptions, StatusCallback};
pub use plan::{PlanController, FINALIZE_PLAN_PROMPT};
pub use task::TaskController;
pub use window::{apply_conversation_window, WindowResult};
