//! Message-send pipeline.
//!
//! Takes one authenticated send request through validation, conversation
//! resolution, user-message persistence, grounding (attachments and web
//! search, run concurrently), context assembly and tier selection, then hands
//! the exchange to the [`StreamingEngine`].
//!
//! The user message is durable before the provider is called; a failure to
//! save it ends the send with [`ChatError::PersistenceFailed`] and no model
//! call is made.

use std::sync::Arc;

use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use chathome_core::context::{assemble, requires_vision, AssemblyInput, AttachmentContent};
use chathome_core::models::{AttachmentRef, Conversation, Identity, Message, MessageRole, Tier};
use chathome_core::store::Store;
use chathome_core::{ChatError, Graceful};

use crate::blob::{owns_key, BlobStore};
use crate::config::ChatConfig;
use crate::engine::{Exchange, ExchangeHandle, StreamingEngine};
use crate::extract::AttachmentExtractor;
use crate::web_search::WebSearchBridge;

/// Inbound send body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Absent: create a new conversation for this message.
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub content: String,
    /// Tier selector (`fast`, `thinking`, `minimal`, `medium`).
    #[serde(default)]
    pub model: Option<String>,
    /// Blob keys from earlier uploads.
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub web_search: Option<bool>,
}

/// A send whose user message is saved and whose completion is running.
pub struct StartedExchange {
    /// Conversation as it was before this exchange.
    pub conversation: Conversation,
    /// True when this send created the conversation.
    pub created: bool,
    pub user_message: Message,
    pub assistant_message_id: String,
    /// Tier the completion runs on, after any vision downgrade.
    pub tier: Tier,
    pub search: Graceful<Option<String>>,
    pub handle: ExchangeHandle,
}

#[derive(Clone)]
pub struct SendPipeline {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    extractor: AttachmentExtractor,
    search: WebSearchBridge,
    engine: StreamingEngine,
    chat: ChatConfig,
}

impl SendPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        search: WebSearchBridge,
        engine: StreamingEngine,
        chat: ChatConfig,
    ) -> Self {
        Self {
            extractor: AttachmentExtractor::new(blobs.clone()),
            store,
            blobs,
            search,
            engine,
            chat,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn send(
        &self,
        identity: &Identity,
        request: SendRequest,
    ) -> Result<StartedExchange, ChatError> {
        let content = self.validate_content(&request.content)?;
        let requested = match request.model.as_deref() {
            Some(selector) => Tier::parse_selector(selector)?,
            None => Tier::default(),
        };

        let keys: Vec<String> = request
            .attachments
            .into_iter()
            .take(self.chat.max_attachments)
            .collect();
        if let Some(foreign) = keys.iter().find(|k| !owns_key(&identity.user_id, k)) {
            debug!(user_id = %identity.user_id, key = %foreign, "attachment outside caller namespace");
            return Err(ChatError::NotFound);
        }

        let (conversation, created) = self
            .resolve_conversation(&identity.user_id, request.conversation_id.as_deref())
            .await?;

        let history = self
            .store
            .list_messages(&conversation.id, Some(self.chat.history_window))
            .await
            .map_err(ChatError::persistence)?;

        let mut user_message = Message::new(&conversation.id, MessageRole::User, content.clone());
        user_message.attachments = self.attachment_refs(&keys).await;
        self.store
            .append_message(&user_message)
            .await
            .map_err(ChatError::persistence)?;
        self.store
            .touch_conversation(&conversation.id, user_message.created_at, None)
            .await
            .map_err(ChatError::persistence)?;

        let (extracted, search) = tokio::join!(
            join_all(keys.iter().map(|k| self.extractor.extract(k))),
            self.search.context_for(&history, &content, request.web_search),
        );
        if let Some(reason) = search.reason() {
            warn!(conversation_id = %conversation.id, reason, "continuing without search context");
        }
        let attachments: Vec<AttachmentContent> =
            extracted.into_iter().map(Graceful::into_value).collect();

        let vision = requires_vision(&attachments);
        let tier = Tier::effective(requested, vision);
        if tier != requested {
            info!(requested = %requested, effective = %tier, "image attachment forces vision tier");
        }

        let assembled = assemble(AssemblyInput {
            role: identity.role,
            display_name: &identity.display_name,
            history: &history,
            history_window: self.chat.history_window,
            user_text: &content,
            attachments: &attachments,
            search_context: search.value().as_deref(),
            tier,
        })?;

        let assistant_message_id = uuid::Uuid::new_v4().to_string();
        info!(
            conversation_id = %conversation.id,
            user_id = %identity.user_id,
            tier = %tier,
            history = history.len(),
            attachments = attachments.len(),
            searched = search.value().is_some(),
            "starting exchange"
        );
        let handle = self.engine.start(Exchange {
            conversation: conversation.clone(),
            user_message: user_message.clone(),
            assistant_message_id: assistant_message_id.clone(),
            tier,
            messages: assembled.messages,
        });

        Ok(StartedExchange {
            conversation,
            created,
            user_message,
            assistant_message_id,
            tier,
            search,
            handle,
        })
    }

    fn validate_content(&self, raw: &str) -> Result<String, ChatError> {
        let content = raw.trim();
        if content.is_empty() {
            return Err(ChatError::validation("message content must not be empty"));
        }
        let chars = content.chars().count();
        if chars > self.chat.max_message_chars {
            return Err(ChatError::validation(format!(
                "message is {} characters; the limit is {}",
                chars, self.chat.max_message_chars
            )));
        }
        Ok(content.to_string())
    }

    async fn resolve_conversation(
        &self,
        owner_id: &str,
        id: Option<&str>,
    ) -> Result<(Conversation, bool), ChatError> {
        match id {
            Some(id) => self
                .store
                .get_conversation(owner_id, id)
                .await
                .map_err(ChatError::persistence)?
                .map(|c| (c, false))
                .ok_or(ChatError::NotFound),
            None => {
                let conversation = Conversation::new(owner_id);
                self.store
                    .create_conversation(&conversation)
                    .await
                    .map_err(ChatError::persistence)?;
                info!(conversation_id = %conversation.id, user_id = owner_id, "conversation created");
                Ok((conversation, true))
            }
        }
    }

    /// Echo each key's stored metadata onto the user message.
    async fn attachment_refs(&self, keys: &[String]) -> Vec<AttachmentRef> {
        let mut refs = Vec::with_capacity(keys.len());
        for key in keys {
            let info = match self.blobs.head(key).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(key = %key, error = %e, "attachment metadata unavailable");
                    None
                }
            };
            refs.push(match info {
                Some(info) => AttachmentRef {
                    key: info.key,
                    name: info.name,
                    size: info.size,
                    content_type: info.content_type,
                },
                None => AttachmentRef {
                    key: key.clone(),
                    name: key.rsplit('/').next().unwrap_or(key).to_string(),
                    size: 0,
                    content_type: String::new(),
                },
            });
        }
        refs
    }
}
