//! Failures of a single backend call
//!
//! None of these reach the transcript as errors: the dispatcher turns each
//! one into the fixed sentence returned by [`DispatchError::user_message`].

use thiserror::Error;

use crate::providers::types::{GENERIC_ERROR_REPLY, ProviderKind};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} API key is not configured")]
    MissingApiKey(ProviderKind),

    #[error("no {0} provider is registered")]
    NotConfigured(ProviderKind),

    #[error("{provider} cannot send history shaped as {shape}")]
    UnsupportedHistory {
        provider: ProviderKind,
        shape: &'static str,
    },

    #[error("failed to send request to {provider} API: {source}")]
    Transport {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API request failed with status {status}: {body}")]
    Status {
        provider: ProviderKind,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to parse {provider} API response: {source}")]
    Decode {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },
}

impl DispatchError {
    /// The sentence appended to the transcript in place of a reply
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MissingApiKey(provider) => provider.missing_key_reply(),
            Self::NotConfigured(_) => GENERIC_ERROR_REPLY,
            Self::UnsupportedHistory { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Status { provider, .. }
            | Self::Decode { provider, .. } => provider.error_reply(),
        }
    }
}
