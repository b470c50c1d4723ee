//! Completion streaming engine.
//!
//! One exchange runs as one spawned task:
//!
//! ```text
//! open provider stream ──► for each delta: accumulate, forward ──► natural end
//!        │                         │                                 │
//!        │ error                   │ error / receiver dropped        ▼
//!        ▼                         ▼                     persist assistant turn
//!      Failed              Failed / Aborted                          │
//!   (nothing persisted)   (nothing persisted)              Done ─────┤
//!                                                                    ▼
//!                                                   title (if needed) + touch
//! ```
//!
//! Deltas travel over a channel with capacity one, so a delta is handed to the
//! transport before the next provider chunk is requested. Dropping the
//! [`ExchangeHandle::events`] receiver aborts the exchange: the provider
//! stream is dropped (closing the upstream request) and no assistant message
//! is written.
//!
//! `Done` is sent once the assistant message is durable; the title and the
//! conversation's `updated_at` are written afterwards, so a client that has
//! seen `Done` may still read the old title for a moment.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chathome_core::context::ChatTurn;
use chathome_core::models::{Conversation, Message, MessageRole, Tier};
use chathome_core::store::Store;
use chathome_core::title::{
    fallback_title, needs_title, sanitize_title, title_request, TITLE_SYSTEM_PROMPT,
};
use chathome_core::{ChatError, Graceful};

use crate::provider::{CallPurpose, CompletionProvider, CompletionRequest};

/// Stored in place of an empty reply.
pub const EMPTY_REPLY_PLACEHOLDER: &str = " ";

const TITLE_TEMPERATURE: f32 = 0.3;
const TITLE_MAX_TOKENS: u32 = 20;

/// What the transport sees, in order: any number of deltas, then exactly one
/// of `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done { message_id: String },
    Failed { error: ChatError },
}

impl StreamEvent {
    /// `Done` and `Failed` end the event sequence.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta(_))
    }
}

/// How an exchange ended, reported by the task's join handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    Completed {
        message: Message,
        /// False when the assistant write failed after a full stream.
        persisted: bool,
        /// Title written by this exchange, if any.
        title: Option<Graceful<String>>,
    },
    Failed {
        error: ChatError,
        forwarded: String,
    },
    Aborted {
        forwarded: String,
    },
}

/// Everything the engine needs for one exchange. The user message must
/// already be persisted.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Conversation as it was before this exchange.
    pub conversation: Conversation,
    pub user_message: Message,
    pub assistant_message_id: String,
    pub tier: Tier,
    pub messages: Vec<ChatTurn>,
}

pub struct ExchangeHandle {
    pub events: mpsc::Receiver<StreamEvent>,
    pub task: JoinHandle<ExchangeOutcome>,
}

/// Generates conversation titles with a short non-streaming call.
#[derive(Clone)]
pub struct TitleGenerator {
    provider: Arc<dyn CompletionProvider>,
    max_chars: usize,
}

impl TitleGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>, max_chars: usize) -> Self {
        Self {
            provider,
            max_chars,
        }
    }

    /// Title for an exchange. Falls back to a truncation of the user's
    /// message when the model call fails or returns nothing usable.
    pub async fn generate(&self, user_message: &str, reply: &str) -> Graceful<String> {
        let request = CompletionRequest::new(
            CallPurpose::Title,
            Tier::Fast,
            vec![
                ChatTurn::system(TITLE_SYSTEM_PROMPT),
                ChatTurn::user(title_request(user_message, reply)),
            ],
        )
        .with_sampling(TITLE_TEMPERATURE, Some(TITLE_MAX_TOKENS));

        let fallback = || fallback_title(user_message, self.max_chars);
        match self.provider.complete(request).await {
            Ok(raw) => match sanitize_title(&raw, self.max_chars) {
                Some(title) => Graceful::Produced(title),
                None => Graceful::defaulted(fallback(), "model returned an empty title"),
            },
            Err(e) => {
                warn!(error = %e, "title generation failed; using message prefix");
                Graceful::defaulted(fallback(), e.to_string())
            }
        }
    }
}

#[derive(Clone)]
pub struct StreamingEngine {
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn Store>,
    titles: TitleGenerator,
}

impl StreamingEngine {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn Store>,
        title_max_chars: usize,
    ) -> Self {
        Self {
            titles: TitleGenerator::new(provider.clone(), title_max_chars),
            provider,
            store,
        }
    }

    /// Spawn the exchange and return its event receiver.
    pub fn start(&self, exchange: Exchange) -> ExchangeHandle {
        let (tx, rx) = mpsc::channel(1);
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.run(exchange, tx).await });
        ExchangeHandle { events: rx, task }
    }

    async fn run(self, exchange: Exchange, tx: mpsc::Sender<StreamEvent>) -> ExchangeOutcome {
        let conversation_id = exchange.conversation.id.clone();
        let request = CompletionRequest::new(
            CallPurpose::Chat,
            exchange.tier,
            exchange.messages.clone(),
        );

        let opened = tokio::select! {
            biased;
            _ = tx.closed() => {
                info!(conversation_id = %conversation_id, "client left before the stream opened");
                return ExchangeOutcome::Aborted { forwarded: String::new() };
            }
            opened = self.provider.stream(request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!(conversation_id = %conversation_id, tier = %exchange.tier, error = %e, "completion failed to start");
                return fail(&tx, e.into(), String::new()).await;
            }
        };

        let mut accumulated = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => None,
                item = stream.next() => Some(item),
            };
            match next {
                None => {
                    info!(
                        conversation_id = %conversation_id,
                        forwarded = accumulated.len(),
                        "stream aborted by client"
                    );
                    return ExchangeOutcome::Aborted {
                        forwarded: accumulated,
                    };
                }
                Some(Some(Ok(delta))) => {
                    accumulated.push_str(&delta);
                    if tx.send(StreamEvent::Delta(delta)).await.is_err() {
                        info!(conversation_id = %conversation_id, "stream aborted by client");
                        return ExchangeOutcome::Aborted {
                            forwarded: accumulated,
                        };
                    }
                }
                Some(Some(Err(e))) => {
                    error!(conversation_id = %conversation_id, error = %e, "completion stream failed");
                    return fail(&tx, e.into(), accumulated).await;
                }
                Some(None) => break,
            }
        }
        // Close the upstream connection before the writes.
        drop(stream);

        self.finalize(exchange, accumulated, &tx).await
    }

    async fn finalize(
        &self,
        exchange: Exchange,
        content: String,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> ExchangeOutcome {
        let conversation_id = exchange.conversation.id.as_str();
        let stored = if content.is_empty() {
            EMPTY_REPLY_PLACEHOLDER.to_string()
        } else {
            content
        };
        let mut message = Message::new(conversation_id, MessageRole::Assistant, stored);
        message.id = exchange.assistant_message_id.clone();
        message.model = Some(exchange.tier);

        let persisted = match self.store.append_message(&message).await {
            Ok(()) => true,
            Err(e) => {
                error!(conversation_id, error = %format!("{:#}", e), "assistant message was not saved");
                false
            }
        };
        // The client already holds the full text; Done stands either way.
        let _ = tx
            .send(StreamEvent::Done {
                message_id: message.id.clone(),
            })
            .await;
        if !persisted {
            return ExchangeOutcome::Completed {
                message,
                persisted,
                title: None,
            };
        }

        let title = if needs_title(exchange.conversation.title.as_deref()) {
            let t = self
                .titles
                .generate(&exchange.user_message.content, &message.content)
                .await;
            debug!(conversation_id, title = %t.value(), defaulted = t.is_defaulted(), "conversation titled");
            Some(t)
        } else {
            None
        };

        if let Err(e) = self
            .store
            .touch_conversation(
                conversation_id,
                message.created_at,
                title.as_ref().map(|t| t.value().as_str()),
            )
            .await
        {
            error!(conversation_id, error = %format!("{:#}", e), "conversation touch failed");
        }

        info!(
            conversation_id,
            message_id = %message.id,
            tier = %exchange.tier,
            chars = message.content.len(),
            "exchange completed"
        );
        ExchangeOutcome::Completed {
            message,
            persisted,
            title,
        }
    }
}

async fn fail(tx: &mpsc::Sender<StreamEvent>, error: ChatError, forwarded: String) -> ExchangeOutcome {
    let _ = tx
        .send(StreamEvent::Failed {
            error: error.clone(),
        })
        .await;
    ExchangeOutcome::Failed { error, forwarded }
}
