//! OpenAI chat completions provider

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::build_persona;
use crate::error::DispatchError;
use crate::types::{ChatMessage, Role};

use super::types::{HistoryPayload, HistoryTurn, LlmProvider, ProviderKind, structured_history};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_OPENAI_MAX_TOKENS: u32 = 500;

/// OpenAI provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature: DEFAULT_OPENAI_TEMPERATURE,
            max_tokens: DEFAULT_OPENAI_MAX_TOKENS,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Persona as the system message, then history, then the new prompt
    fn to_openai_messages(prompt: &str, history: &[HistoryTurn]) -> Vec<OpenAiMessage> {
        let mut result = vec![OpenAiMessage {
            role: "system".to_string(),
            content: build_persona(),
        }];

        for turn in history {
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "assistant",
                // the persona above already covers the system slot
                Role::System => continue,
            };
            result.push(OpenAiMessage {
                role: role.to_string(),
                content: turn.text.clone(),
            });
        }

        result.push(OpenAiMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        result
    }

    fn extract_content(resp: OpenAiApiResponse) -> Option<String> {
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn format_history(&self, prior: &[ChatMessage]) -> HistoryPayload {
        HistoryPayload::Turns(structured_history(prior))
    }

    async fn invoke(
        &self,
        prompt: &str,
        history: HistoryPayload,
    ) -> Result<Option<String>, DispatchError> {
        let provider = ProviderKind::OpenAi;
        let turns = match history {
            HistoryPayload::Turns(turns) => turns,
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

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = OpenAiRequest {
            model: self.model.clone(),
            messages: Self::to_openai_messages(prompt, &turns),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(
            "OpenAI request: model={}, messages={}",
            self.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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

        let api_response: OpenAiApiResponse = response
            .json()
            .await
            .map_err(|source| DispatchError::Decode {
                provider,
                source: source.without_url(),
            })?;

        debug!(
            "OpenAI response: choices={}, finish_reason={:?}",
            api_response.choices.len(),
            api_response.choices.first().map(|c| &c.finish_reason)
        );

        Ok(Self::extract_content(api_response))
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}
