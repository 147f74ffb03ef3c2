//! Google Gemini provider
//!
//! Gemini receives the conversation as a flattened context block embedded in
//! one prompt, not as a list of turns.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::build_system_context;
use crate::error::DispatchError;
use crate::types::ChatMessage;

use super::types::{HistoryPayload, LlmProvider, ProviderKind, context_block};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini provider
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            model,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Persona, conversation context and the user's query in one prompt
    fn build_prompt(prompt: &str, context_block: &str) -> String {
        format!(
            "{}\n\nUser Query: {}",
            build_system_context(context_block),
            prompt
        )
    }

    fn request_body(prompt: &str, context_block: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: Some(Self::build_prompt(prompt, context_block)),
                }],
            }],
        }
    }

    /// Text of the first candidate, `None` if it carried none
    fn extract_text(resp: GeminiApiResponse) -> Option<String> {
        let candidate = resp.candidates.into_iter().next()?;
        let text: String = candidate
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn format_history(&self, prior: &[ChatMessage]) -> HistoryPayload {
        HistoryPayload::ContextBlock(context_block(prior))
    }

    async fn invoke(
        &self,
        prompt: &str,
        history: HistoryPayload,
    ) -> Result<Option<String>, DispatchError> {
        let provider = ProviderKind::Gemini;
        let block = match history {
            HistoryPayload::ContextBlock(block) => block,
            other => {
                return Err(DispatchError::UnsupportedHistory {
                    provider,
                    shape: other.shape(),
                });
            }
        };

        if self.api_key.is_empty() {
            return Err(DispatchError::MissingApiKey(provider));
        }

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = Self::request_body(prompt, &block);

        debug!(
            "Gemini request: model={}, context_lines={}",
            self.model,
            block.lines().count()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|source| DispatchError::Transport {
                provider,
                source: source.without_url(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DispatchError::Status {
                provider,
                status,
                body,
            });
        }

        let api_response: GeminiApiResponse = response
            .json()
            .await
            .map_err(|source| DispatchError::Decode {
                provider,
                source: source.without_url(),
            })?;

        debug!(
            "Gemini response: candidates={}",
            api_response.candidates.len()
        );

        Ok(Self::extract_text(api_response))
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}
