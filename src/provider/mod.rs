//! Language-model provider abstraction.
//!
//! Defines the [`CompletionProvider`] trait and its implementations:
//! - **[`OpenAiProvider`]** calls an OpenAI-compatible `/chat/completions`
//!   endpoint, streaming (SSE) or not.
//! - **[`DisabledProvider`]** fails every call; used when no API key is set.
//! - **[`ScriptedProvider`]** replays scripted replies and streams, for tests.
//!
//! One provider instance is constructed at startup and shared by every
//! pipeline component through an `Arc<dyn CompletionProvider>`.
//!
//! # Tier parameters
//!
//! | Tier | Sampling | Extra |
//! |------|----------|-------|
//! | `fast` | profile temperature (0.7) | none |
//! | `thinking` | profile temperature (1.0) | `reasoning_effort` (medium) |
//!
//! Auxiliary calls (classifier, query, title) pin their own temperature and
//! `max_tokens` through [`CompletionRequest::with_sampling`].

mod openai;
mod scripted;
mod sse;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use tracing::warn;

use chathome_core::context::ChatTurn;
use chathome_core::models::Tier;
use chathome_core::ChatError;

use crate::config::ProviderConfig;

pub use openai::OpenAiProvider;
pub use scripted::{ScriptedProvider, ScriptedReply, StreamScript};
pub use sse::{SseDecoder, SseEvent};

/// Errors from a model provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("model provider is not configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("malformed provider response: {0}")]
    Decode(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
}

impl From<ProviderError> for ChatError {
    fn from(e: ProviderError) -> Self {
        ChatError::UpstreamUnavailable(e.to_string())
    }
}

/// Incremental text deltas from a streaming completion.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// What a completion call is for. Used for logging and by test doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPurpose {
    Chat,
    Classify,
    SearchQuery,
    Title,
    Relay,
}

impl fmt::Display for CallPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallPurpose::Chat => "chat",
            CallPurpose::Classify => "classify",
            CallPurpose::SearchQuery => "search_query",
            CallPurpose::Title => "title",
            CallPurpose::Relay => "relay",
        })
    }
}

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub purpose: CallPurpose,
    pub tier: Tier,
    pub messages: Vec<ChatTurn>,
    /// Overrides the tier's temperature (and drops its reasoning effort).
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(purpose: CallPurpose, tier: Tier, messages: Vec<ChatTurn>) -> Self {
        Self {
            purpose,
            tier,
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.temperature = Some(temperature);
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Non-streaming completion; returns the full reply text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;

    /// Open a streaming completion. Errors here mean nothing was produced.
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, ProviderError>;
}

/// Provider used when no credentials are configured.
pub struct DisabledProvider;

#[async_trait]
impl CompletionProvider for DisabledProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured)
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<TokenStream, ProviderError> {
        Err(ProviderError::NotConfigured)
    }
}

/// Build the provider described by `config`.
///
/// A missing API key is not fatal: the server still starts, and every model
/// call fails with [`ProviderError::NotConfigured`].
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.api_key() {
        Some(key) => Ok(Arc::new(OpenAiProvider::new(config, key)?)),
        None => {
            warn!(
                env = %config.api_key_env,
                "no model provider API key set; completions are disabled"
            );
            Ok(Arc::new(DisabledProvider))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_map_to_upstream() {
        let e: ChatError = ProviderError::Timeout("completion").into();
        assert_eq!(
            e,
            ChatError::UpstreamUnavailable("completion timed out".into())
        );
    }

    #[tokio::test]
    async fn disabled_provider_refuses() {
        let p = DisabledProvider;
        let req = CompletionRequest::new(CallPurpose::Chat, Tier::Fast, vec![]);
        assert_eq!(
            p.complete(req.clone()).await,
            Err(ProviderError::NotConfigured)
        );
        assert!(p.stream(req).await.is_err());
    }
}
