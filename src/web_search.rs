//! Relevance classifier and web search bridge.
//!
//! Decides whether a send should be grounded in fresh search results and, if
//! so, produces the formatted grounding block for the system instruction.
//! Nothing in here can fail a send: every failure degrades to "no search
//! context" and is reported through [`Graceful::Defaulted`].
//!
//! # Flow
//!
//! ```text
//! flag=false ─────────────────────────────► none
//! flag=None ──► classifier (fast, t=0) ──NO──► none
//!                      │ YES / flag=true
//!                      ▼
//!              query generation (fast, t=0.3)
//!                      ▼
//!              search provider (N results) ──► formatted context
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use chathome_core::context::{history_turns, ChatTurn};
use chathome_core::models::{Message, Tier};
use chathome_core::search::{
    classifier_says_yes, format_search_results, SearchHit, CLASSIFIER_PROMPT, QUERY_PROMPT,
};
use chathome_core::{ChatError, Graceful};

use crate::config::SearchConfig;
use crate::provider::{CallPurpose, CompletionProvider, CompletionRequest};

/// History turns shown to the classifier.
const CLASSIFIER_HISTORY: usize = 3;
/// History turns shown to query generation.
const QUERY_HISTORY: usize = 5;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Transport(String),
    #[error("search provider returned HTTP {0}")]
    Status(u16),
    #[error("search timed out")]
    Timeout,
    #[error("malformed search response: {0}")]
    Decode(String),
}

impl From<SearchError> for ChatError {
    fn from(e: SearchError) -> Self {
        ChatError::UpstreamUnavailable(e.to_string())
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// ScrapingDog-compatible Google search client.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic_results: Option<Vec<SearchHit>>,
}

impl HttpSearchProvider {
    pub fn new(config: &SearchConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/google", config.base_url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, SearchError> {
        let results = count.to_string();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("query", query),
                ("results", results.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout
                } else {
                    SearchError::Transport(e.to_string())
                }
            })?;
        if !resp.status().is_success() {
            return Err(SearchError::Status(resp.status().as_u16()));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))?;
        let mut hits = body.organic_results.unwrap_or_default();
        hits.truncate(count);
        Ok(hits)
    }
}

/// Fixed-result search provider for tests and offline runs.
#[derive(Default)]
pub struct StaticSearch {
    outcome: Option<Result<Vec<SearchHit>, SearchError>>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn hits(hits: Vec<SearchHit>) -> Self {
        Self {
            outcome: Some(Ok(hits)),
            queries: Mutex::default(),
        }
    }

    pub fn failing(error: SearchError) -> Self {
        Self {
            outcome: Some(Err(error)),
            queries: Mutex::default(),
        }
    }

    /// Queries received so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>, SearchError> {
        if let Ok(mut q) = self.queries.lock() {
            q.push(query.to_string());
        }
        match &self.outcome {
            Some(Ok(hits)) => Ok(hits.iter().take(count).cloned().collect()),
            Some(Err(e)) => Err(e.clone()),
            None => Ok(Vec::new()),
        }
    }
}

/// Build the configured search provider, or `None` when search is off.
pub fn create_search(config: &SearchConfig) -> Result<Option<Arc<dyn SearchProvider>>> {
    if !config.enabled {
        info!("web search disabled by configuration");
        return Ok(None);
    }
    match config.api_key() {
        Some(key) => Ok(Some(Arc::new(HttpSearchProvider::new(config, key)?))),
        None => {
            warn!(env = %config.api_key_env, "no search API key set; web search is disabled");
            Ok(None)
        }
    }
}

#[derive(Clone)]
pub struct WebSearchBridge {
    provider: Arc<dyn CompletionProvider>,
    search: Option<Arc<dyn SearchProvider>>,
    auto_classify: bool,
    result_count: usize,
}

impl WebSearchBridge {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        search: Option<Arc<dyn SearchProvider>>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            provider,
            search,
            auto_classify: config.auto_classify,
            result_count: config.result_count,
        }
    }

    /// Grounding context for `user_text`, or `None` when no search ran.
    ///
    /// `flag` is the caller's `webSearch` field: `Some(true)` forces a search,
    /// `Some(false)` skips it, `None` defers to the classifier.
    pub async fn context_for(
        &self,
        history: &[Message],
        user_text: &str,
        flag: Option<bool>,
    ) -> Graceful<Option<String>> {
        let wanted = match flag {
            Some(false) => return Graceful::Produced(None),
            Some(true) => true,
            None if !self.auto_classify => return Graceful::Produced(None),
            None => false,
        };

        let Some(search) = &self.search else {
            return Graceful::defaulted(None, "web search is not configured");
        };

        if !wanted {
            match self.should_search(history, user_text).await {
                Graceful::Produced(true) => {}
                Graceful::Produced(false) => return Graceful::Produced(None),
                Graceful::Defaulted { reason, .. } => return Graceful::defaulted(None, reason),
            }
        }

        let query = self.search_query(history, user_text).await.into_value();
        debug!(query = %query, "running web search");
        match search.search(&query, self.result_count).await {
            Ok(hits) => {
                info!(hits = hits.len(), "web search grounded the exchange");
                Graceful::Produced(Some(format_search_results(&hits)))
            }
            Err(e) => {
                warn!(error = %e, "web search failed; continuing without it");
                Graceful::defaulted(None, e.to_string())
            }
        }
    }

    /// Ask the fast tier whether a search would help. Fails closed.
    pub async fn should_search(&self, history: &[Message], user_text: &str) -> Graceful<bool> {
        let request = CompletionRequest::new(
            CallPurpose::Classify,
            Tier::Fast,
            prompt_turns(CLASSIFIER_PROMPT, history, CLASSIFIER_HISTORY, user_text),
        )
        .with_sampling(0.0, Some(5));
        match self.provider.complete(request).await {
            Ok(reply) => {
                let yes = classifier_says_yes(&reply);
                debug!(reply = %reply.trim(), search = yes, "relevance classifier");
                Graceful::Produced(yes)
            }
            Err(e) => {
                warn!(error = %e, "relevance classifier failed; skipping search");
                Graceful::defaulted(false, format!("classifier failed: {}", e))
            }
        }
    }

    /// Condense the conversation into one search query.
    ///
    /// Falls back to the raw user message when the model fails or says
    /// nothing.
    pub async fn search_query(&self, history: &[Message], user_text: &str) -> Graceful<String> {
        let request = CompletionRequest::new(
            CallPurpose::SearchQuery,
            Tier::Fast,
            prompt_turns(QUERY_PROMPT, history, QUERY_HISTORY, user_text),
        )
        .with_sampling(0.3, Some(100));
        match self.provider.complete(request).await {
            Ok(reply) if !reply.trim().is_empty() => Graceful::Produced(reply.trim().to_string()),
            Ok(_) => Graceful::defaulted(user_text.to_string(), "empty search query"),
            Err(e) => {
                warn!(error = %e, "search query generation failed; using the message");
                Graceful::defaulted(user_text.to_string(), e.to_string())
            }
        }
    }
}

fn prompt_turns(
    instruction: &str,
    history: &[Message],
    window: usize,
    user_text: &str,
) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(window + 2);
    turns.push(ChatTurn::system(instruction));
    turns.extend(history_turns(history, window));
    turns.push(ChatTurn::user(user_text));
    turns
}
