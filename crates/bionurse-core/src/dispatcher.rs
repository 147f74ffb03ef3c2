//! Routes a user turn to the selected backend and normalizes the outcome

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::providers::{LlmProvider, ProviderKind};
use crate::types::ChatMessage;

/// Holds one provider per [`ProviderKind`]. Stateless per call: every
/// dispatch is one format step and one backend call, no retries.
#[derive(Default)]
pub struct Dispatcher {
    providers: HashMap<ProviderKind, Box<dyn LlmProvider>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one of the same kind
    pub fn with_provider(mut self, provider: Box<dyn LlmProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Box<dyn LlmProvider>) {
        debug!(
            "Registering provider {} ({})",
            provider.kind(),
            provider.model()
        );
        self.providers.insert(provider.kind(), provider);
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn model(&self, kind: ProviderKind) -> Option<&str> {
        self.providers.get(&kind).map(|p| p.model())
    }

    /// Send `text` with `prior` turns to `kind`. Always yields reply text:
    /// failures become the provider's fixed sentence.
    pub async fn dispatch(&self, kind: ProviderKind, text: &str, prior: &[ChatMessage]) -> String {
        match self.try_dispatch(kind, text, prior).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                warn!("Provider {} returned no text", kind);
                kind.empty_reply().to_string()
            }
            Err(e) => {
                warn!("Provider {} failed: {}", kind, e);
                e.user_message().to_string()
            }
        }
    }

    async fn try_dispatch(
        &self,
        kind: ProviderKind,
        text: &str,
        prior: &[ChatMessage],
    ) -> Result<Option<String>, DispatchError> {
        let provider = self
            .providers
            .get(&kind)
            .ok_or(DispatchError::NotConfigured(kind))?;

        let history = provider.format_history(prior);
        debug!(
            "Dispatching to {} ({}) with {} history",
            kind,
            provider.model(),
            history.shape()
        );

        let reply = provider.invoke(text, history).await?;
        Ok(reply.filter(|r| !r.trim().is_empty()))
    }
}
