//! Chat backends
//!
//! Gemini takes history as a flattened context block, OpenAI as structured
//! role/text turns. Both implement [`LlmProvider`] and are selected by
//! [`ProviderKind`] in the [`Dispatcher`](crate::dispatcher::Dispatcher).

pub mod gemini;
pub mod openai;
pub mod types;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use types::{
    HistoryPayload, HistoryTurn, LlmProvider, ProviderKind, UnknownProvider, context_block,
    structured_history,
};
