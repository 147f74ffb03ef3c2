//! Provider-agnostic types for the two chat backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::types::{ChatMessage, Role};

/// Reply used when a submission targets a provider nobody registered
pub const GENERIC_ERROR_REPLY: &str =
    "I encountered an error processing your request. Please try again.";

/// Which backend a turn is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        }
    }

    pub fn all() -> [ProviderKind; 2] {
        [Self::Gemini, Self::OpenAi]
    }

    /// Label shown next to replies
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Gemini => "Gemini 2.5",
            Self::OpenAi => "GPT-4o",
        }
    }

    /// Reply when the backend answered without any text
    pub fn empty_reply(&self) -> &'static str {
        match self {
            Self::Gemini => "I apologize, I couldn't generate a response at this time.",
            Self::OpenAi => "No response from AI.",
        }
    }

    /// Reply when the call itself failed
    pub fn error_reply(&self) -> &'static str {
        match self {
            Self::Gemini => {
                "I'm having trouble connecting to the medical database right now. Please try again later."
            }
            Self::OpenAi => "Sorry, I couldn't process your request.",
        }
    }

    /// Reply when no API key is available
    pub fn missing_key_reply(&self) -> &'static str {
        match self {
            Self::Gemini => {
                "Configuration Error: Gemini API Key is missing. Please check your environment variables."
            }
            Self::OpenAi => {
                "Configuration Error: OpenAI API Key is missing. Please check your environment variables."
            }
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider '{0}' (expected 'gemini' or 'openai')")]
pub struct UnknownProvider(pub String);

impl std::str::FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" | "gpt" => Ok(Self::OpenAi),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// One prior turn in structured form, role preserved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

/// History in the shape a backend expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryPayload {
    /// Role-labelled lines joined by newlines
    ContextBlock(String),
    /// Ordered role/text records
    Turns(Vec<HistoryTurn>),
}

impl HistoryPayload {
    pub fn shape(&self) -> &'static str {
        match self {
            Self::ContextBlock(_) => "context block",
            Self::Turns(_) => "structured turns",
        }
    }
}

/// Flatten prior non-system turns into `"User: ..."` / `"Assistant: ..."` lines
pub fn context_block(prior: &[ChatMessage]) -> String {
    prior
        .iter()
        .filter(|m| !m.is_system())
        .map(|m| format!("{}: {}", m.role.context_label(), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prior non-system turns as role/text records, in order
pub fn structured_history(prior: &[ChatMessage]) -> Vec<HistoryTurn> {
    prior
        .iter()
        .filter(|m| !m.is_system())
        .map(|m| HistoryTurn {
            role: m.role,
            text: m.text.clone(),
        })
        .collect()
}

/// A chat backend: shapes history its own way and makes exactly one call
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model identifier (e.g. "gemini-2.5-flash", "gpt-4o-mini")
    fn model(&self) -> &str;

    fn format_history(&self, prior: &[ChatMessage]) -> HistoryPayload;

    /// Send the prompt with its history. `Ok(None)` means the backend replied
    /// without any text.
    async fn invoke(
        &self,
        prompt: &str,
        history: HistoryPayload,
    ) -> Result<Option<String>, DispatchError>;
}
