//! Shared types for bionurse-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

impl Role {
    /// Label used when a turn is flattened into a plain-text context block
    pub fn context_label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Model | Self::System => "Assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Model => write!(f, "model"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A single turn in the transcript. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Backend that produced this reply (replies only)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub provider: Option<ProviderKind>,
}

impl ChatMessage {
    pub fn new(id: String, role: Role, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            role,
            text: text.into(),
            timestamp,
            provider: None,
        }
    }

    /// Tag a reply with the backend that produced it
    pub fn tagged(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}
