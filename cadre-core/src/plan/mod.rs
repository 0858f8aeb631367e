mod store;
mod tool;

pub use store::PlanStore;
pub use tool::{PlanArgs, PlanCommand, PlanTool, PLAN_TOOL_NAME};
