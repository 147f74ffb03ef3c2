//! bionurse-core - chat-turn orchestration for the BioNurse assistant
//!
//! This crate provides:
//! - A conversation store holding the append-only transcript, the selected
//!   provider and the single in-flight flag
//! - A dispatcher that shapes history per backend and turns every failure into
//!   a fixed user-facing sentence
//! - Gemini and OpenAI providers behind one [`LlmProvider`] trait
//! - The assistant persona shared by both backends

pub mod clock;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod providers;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
pub use context::{EMERGENCY_DISCLAIMER, WELCOME_MESSAGE, build_persona, build_system_context};
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use providers::{GeminiProvider, LlmProvider, OpenAiProvider, ProviderKind};
pub use store::{ConversationStore, StoreEvent, SubmitOutcome};
pub use types::{ChatMessage, Role};
