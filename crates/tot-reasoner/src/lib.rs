pub mod anthropic;
pub mod hub;
pub mod prompts;

pub use anthropic::{AnthropicConfig, AnthropicReasoner};
pub use hub::HubReasoner;
