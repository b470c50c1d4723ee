//! OpenAI-compatible chat completions client.
//!
//! Works against any server that implements `POST {base_url}/chat/completions`
//! with bearer-token auth (OpenAI, vLLM, llama.cpp server, LiteLLM proxies).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chathome_core::context::ChatTurn;
use chathome_core::models::Tier;

use super::sse::{SseDecoder, SseEvent};
use super::{CompletionProvider, CompletionRequest, ProviderError, TokenStream};
use crate::config::{ProviderConfig, TierProfile};

const ERROR_BODY_PREVIEW: usize = 500;

pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    fast: TierProfile,
    thinking: TierProfile,
    request_timeout: Duration,
    idle_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            fast: config.fast.clone(),
            thinking: config.thinking.clone(),
            request_timeout: Duration::from_secs(config.timeout_secs),
            idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
        })
    }

    fn profile(&self, tier: Tier) -> &TierProfile {
        match tier {
            Tier::Fast => &self.fast,
            Tier::Thinking => &self.thinking,
        }
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest, stream: bool) -> ChatRequestBody<'a> {
        let profile = self.profile(request.tier);
        // Pinned sampling (auxiliary calls) replaces the tier's profile.
        let (temperature, reasoning_effort) = match request.temperature {
            Some(t) => (Some(t), None),
            None => (
                Some(profile.temperature),
                profile.reasoning_effort.as_deref(),
            ),
        };
        ChatRequestBody {
            model: &profile.model,
            messages: &request.messages,
            stream,
            temperature,
            reasoning_effort,
            max_tokens: request.max_tokens,
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = self.body(request, stream);
        debug!(
            purpose = %request.purpose,
            model = body.model,
            turns = request.messages.len(),
            stream,
            "provider request"
        );
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let body: String = text.chars().take(ERROR_BODY_PREVIEW).collect();
            warn!(status = status.as_u16(), purpose = %request.purpose, "provider error response");
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

fn transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout("provider request")
    } else {
        ProviderError::Transport(e.to_string())
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let call = async {
            let resp = self.send(&request, false).await?;
            let parsed: ChatCompletionResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Decode(e.to_string()))?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content.unwrap_or_default())
                .ok_or_else(|| ProviderError::Decode("no choices in response".into()))
        };
        tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout("completion"))?
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, ProviderError> {
        let resp = tokio::time::timeout(self.request_timeout, self.send(&request, true))
            .await
            .map_err(|_| ProviderError::Timeout("stream open"))??;
        Ok(decode_stream(resp.bytes_stream().boxed(), self.idle_timeout))
    }
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    pending: std::collections::VecDeque<String>,
    idle: Duration,
    finished: bool,
    ended: bool,
    error: Option<ProviderError>,
}

/// Turn a raw SSE byte stream into text deltas.
///
/// The stream ends cleanly on `[DONE]` or after a finish reason. A body that
/// closes before either is reported as [`ProviderError::Stream`].
fn decode_stream(
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    idle: Duration,
) -> TokenStream {
    let state = StreamState {
        body,
        decoder: SseDecoder::new(),
        pending: Default::default(),
        idle,
        finished: false,
        ended: false,
        error: None,
    };
    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(delta) = st.pending.pop_front() {
                return Some((Ok(delta), st));
            }
            if let Some(e) = st.error.take() {
                return Some((Err(e), st));
            }
            if st.ended {
                return None;
            }
            let next = match tokio::time::timeout(st.idle, st.body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    st.fail(ProviderError::Timeout("stream chunk"));
                    continue;
                }
            };
            match next {
                Some(Ok(bytes)) => match st.decoder.push(&bytes) {
                    Ok(events) => {
                        if apply(&mut st, events) {
                            st.ended = true;
                        }
                    }
                    Err(e) => st.fail(e),
                },
                Some(Err(e)) => st.fail(ProviderError::Stream(e.to_string())),
                None => match st.decoder.finish() {
                    Ok(events) => {
                        let done = apply(&mut st, events);
                        if done || st.finished {
                            st.ended = true;
                        } else {
                            st.fail(ProviderError::Stream("connection closed early".into()));
                        }
                    }
                    Err(e) => st.fail(e),
                },
            }
        }
    }))
}

impl StreamState {
    fn fail(&mut self, e: ProviderError) {
        self.error = Some(e);
        self.ended = true;
    }
}

/// Queue deltas; returns true once `[DONE]` has been seen.
fn apply(st: &mut StreamState, events: Vec<SseEvent>) -> bool {
    let mut done = false;
    for event in events {
        match event {
            SseEvent::Delta(text) => st.pending.push_back(text),
            SseEvent::Finished => st.finished = true,
            SseEvent::Done => done = true,
        }
    }
    done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CallPurpose;

    fn chunks(parts: &[&'static str]) -> BoxStream<'static, reqwest::Result<Bytes>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(s: TokenStream) -> Vec<Result<String, ProviderError>> {
        s.collect().await
    }

    #[tokio::test]
    async fn decodes_split_chunks_until_done() {
        let body = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let out = collect(decode_stream(body, Duration::from_secs(5))).await;
        assert_eq!(out, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);
    }

    #[tokio::test]
    async fn finish_reason_without_done_is_clean() {
        let body = chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\n",
        ]);
        let out = collect(decode_stream(body, Duration::from_secs(5))).await;
        assert_eq!(out, vec![Ok("ok".to_string())]);
    }

    #[tokio::test]
    async fn early_close_is_an_error_after_deltas() {
        let body = chunks(&["data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n"]);
        let out = collect(decode_stream(body, Duration::from_secs(5))).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Ok("par".to_string()));
        assert!(matches!(out[1], Err(ProviderError::Stream(_))));
    }

    #[tokio::test]
    async fn stalled_stream_times_out() {
        let body = stream::pending::<reqwest::Result<Bytes>>().boxed();
        let out = collect(decode_stream(body, Duration::from_millis(20))).await;
        assert_eq!(out, vec![Err(ProviderError::Timeout("stream chunk"))]);
    }

    #[test]
    fn pinned_sampling_drops_reasoning_effort() {
        let provider = OpenAiProvider::new(&ProviderConfig::default(), "k".into()).unwrap();
        let req = CompletionRequest::new(CallPurpose::Chat, Tier::Thinking, vec![]);
        let body = serde_json::to_value(provider.body(&req, true)).unwrap();
        assert_eq!(body["model"], "o4-mini");
        assert_eq!(body["reasoning_effort"], "medium");
        assert_eq!(body["stream"], true);

        let pinned = req.with_sampling(0.0, Some(5));
        let body = serde_json::to_value(provider.body(&pinned, false)).unwrap();
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["max_tokens"], 5);
        assert!(body.get("reasoning_effort").is_none());
    }
}
