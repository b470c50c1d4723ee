//! Deterministic provider for tests and offline development.
//!
//! Replies are scripted per [`CallPurpose`]: one-shot replies are consumed in
//! order, then the purpose's standing reply (if any) answers every later call.
//! Every request is recorded so tests can assert on what was sent.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{CallPurpose, CompletionProvider, CompletionRequest, ProviderError, TokenStream};

/// A scripted non-streaming reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    /// Answer after sleeping, like a slow upstream.
    Slow(Duration, String),
    Fail(ProviderError),
}

impl ScriptedReply {
    pub fn text(s: impl Into<String>) -> Self {
        ScriptedReply::Text(s.into())
    }

    pub fn slow(delay: Duration, s: impl Into<String>) -> Self {
        ScriptedReply::Slow(delay, s.into())
    }
}

/// A scripted streaming reply.
pub enum StreamScript {
    /// Yield these deltas, then end cleanly.
    Chunks(Vec<String>),
    /// Yield these deltas, then fail.
    FailAfter(Vec<String>, ProviderError),
    /// Refuse to open the stream.
    OpenFails(ProviderError),
    /// Deltas are fed by the test through the returned sender.
    Channel(mpsc::Receiver<Result<String, ProviderError>>),
}

impl StreamScript {
    pub fn chunks<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StreamScript::Chunks(parts.into_iter().map(Into::into).collect())
    }
}

#[derive(Default)]
struct Scripts {
    once: HashMap<CallPurpose, VecDeque<ScriptedReply>>,
    always: HashMap<CallPurpose, ScriptedReply>,
    streams: VecDeque<StreamScript>,
    calls: Vec<CompletionRequest>,
}

#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<Scripts>,
    chunk_delay: Option<Duration>,
    streams_dropped: Arc<AtomicUsize>,
    chunks_pulled: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every scripted chunk, so consumers can fall behind.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    fn scripts(&self) -> MutexGuard<'_, Scripts> {
        // A panic while holding the lock already failed the test.
        self.scripts.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Answer the next `purpose` call with `reply`.
    pub fn once(&self, purpose: CallPurpose, reply: ScriptedReply) -> &Self {
        self.scripts()
            .once
            .entry(purpose)
            .or_default()
            .push_back(reply);
        self
    }

    /// Answer every `purpose` call (after one-shot replies run out) with `reply`.
    pub fn always(&self, purpose: CallPurpose, reply: ScriptedReply) -> &Self {
        self.scripts().always.insert(purpose, reply);
        self
    }

    /// Queue the next streaming reply.
    pub fn push_stream(&self, script: StreamScript) -> &Self {
        self.scripts().streams.push_back(script);
        self
    }

    /// Queue a channel-driven stream and hand back its feeding end.
    pub fn push_channel_stream(&self) -> mpsc::Sender<Result<String, ProviderError>> {
        let (tx, rx) = mpsc::channel(16);
        self.push_stream(StreamScript::Channel(rx));
        tx
    }

    /// Every request seen so far, in call order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.scripts().calls.clone()
    }

    pub fn calls_for(&self, purpose: CallPurpose) -> Vec<CompletionRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.purpose == purpose)
            .collect()
    }

    /// Streams that have been dropped, whether finished or abandoned.
    pub fn streams_dropped(&self) -> usize {
        self.streams_dropped.load(Ordering::SeqCst)
    }

    /// Deltas handed out across all streams.
    pub fn chunks_pulled(&self) -> usize {
        self.chunks_pulled.load(Ordering::SeqCst)
    }
}

/// Counts the stream as dropped when the consumer lets go of it.
struct DropFlag(Arc<AtomicUsize>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let purpose = request.purpose;
        let reply = {
            let mut scripts = self.scripts();
            scripts.calls.push(request);
            let queued = scripts.once.get_mut(&purpose).and_then(VecDeque::pop_front);
            let standing = scripts.always.get(&purpose).cloned();
            queued.or(standing)
        };
        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(ScriptedReply::Fail(e)) => Err(e),
            None => Err(ProviderError::Transport(format!(
                "no scripted reply for {}",
                purpose
            ))),
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, ProviderError> {
        let script = {
            let mut scripts = self.scripts();
            scripts.calls.push(request);
            scripts.streams.pop_front()
        };
        let items: stream::BoxStream<'static, Result<String, ProviderError>> = match script {
            None => {
                return Err(ProviderError::Transport(
                    "no scripted stream queued".into(),
                ))
            }
            Some(StreamScript::OpenFails(e)) => return Err(e),
            Some(StreamScript::Chunks(parts)) => stream::iter(parts.into_iter().map(Ok)).boxed(),
            Some(StreamScript::FailAfter(parts, e)) => stream::iter(
                parts
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(e))),
            )
            .boxed(),
            Some(StreamScript::Channel(rx)) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
        };

        let flag = DropFlag(self.streams_dropped.clone());
        let pulled = self.chunks_pulled.clone();
        let delay = self.chunk_delay;
        let counted = items.then(move |item| {
            let pulled = pulled.clone();
            async move {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                pulled.fetch_add(1, Ordering::SeqCst);
                item
            }
        });
        Ok(Box::pin(counted.map(move |item| {
            let _keep = &flag;
            item
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chathome_core::models::Tier;

    fn req(purpose: CallPurpose) -> CompletionRequest {
        CompletionRequest::new(purpose, Tier::Fast, vec![])
    }

    #[tokio::test]
    async fn once_replies_run_before_standing_reply() {
        let p = ScriptedProvider::new();
        p.once(CallPurpose::Title, ScriptedReply::text("First"))
            .always(CallPurpose::Title, ScriptedReply::text("Later"));
        assert_eq!(p.complete(req(CallPurpose::Title)).await.unwrap(), "First");
        assert_eq!(p.complete(req(CallPurpose::Title)).await.unwrap(), "Later");
        assert_eq!(p.complete(req(CallPurpose::Title)).await.unwrap(), "Later");
        assert!(p.complete(req(CallPurpose::Classify)).await.is_err());
        assert_eq!(p.calls_for(CallPurpose::Title).len(), 3);
    }

    #[tokio::test]
    async fn streams_count_drops() {
        let p = ScriptedProvider::new();
        p.push_stream(StreamScript::chunks(["a", "b", "c"]));
        let mut s = p.stream(req(CallPurpose::Chat)).await.unwrap();
        assert_eq!(s.next().await, Some(Ok("a".to_string())));
        assert_eq!(p.streams_dropped(), 0);
        drop(s);
        assert_eq!(p.streams_dropped(), 1);
        assert_eq!(p.chunks_pulled(), 1);
    }

    #[tokio::test]
    async fn channel_stream_follows_sender() {
        let p = ScriptedProvider::new();
        let tx = p.push_channel_stream();
        let mut s = p.stream(req(CallPurpose::Chat)).await.unwrap();
        tx.send(Ok("hi".into())).await.unwrap();
        drop(tx);
        assert_eq!(s.next().await, Some(Ok("hi".to_string())));
        assert_eq!(s.next().await, None);
    }
}
