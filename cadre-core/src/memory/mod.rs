mod condenser;
mod conversation;
mod recall;

pub use condenser::{condenser_from_config, Condenser, NoopCondenser};
pub use conversation::ConversationMemory;
pub use recall::RecallMemory;
