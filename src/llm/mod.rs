//! LLM provider boundary: message types, usage accounting, the HTTP client,
//! and the bounded conversation history.

pub mod client;
pub mod history;
pub mod models;
pub mod provider;

pub use client::OpenAiCompatibleClient;
pub use history::ConversationHistory;
pub use models::{merge_usage, next_fallback, CostLedger, Usage};
pub use provider::{ChatMessage, Completion, LlmError, LlmErrorCategory, LlmProvider, Role};
