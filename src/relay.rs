//! Peer-messaging relay.
//!
//! A user sends a raw message to another user. The model rewrites it (clearer,
//! politer, same meaning), the result is logged in the relay table, and a copy
//! lands in the recipient's `Messages` conversation as a system-attributed
//! turn prefixed with the sender's name.
//!
//! Delivery is the relay record. Rewriting falls back to the raw text, and
//! mirroring is best-effort; neither can fail a delivered message.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use chathome_core::context::ChatTurn;
use chathome_core::models::{Conversation, Identity, Message, MessageRole, RelayMessage, Tier};
use chathome_core::store::Store;
use chathome_core::{ChatError, Graceful};

use crate::provider::{CallPurpose, CompletionProvider, CompletionRequest};

/// Title of the recipient conversation that collects relayed messages.
pub const MIRROR_TITLE: &str = "Messages";

/// Sender name when neither an override nor a display name is available.
const ANONYMOUS_SENDER: &str = "Someone";

const RELAY_SYSTEM_PROMPT: &str =
    "Rewrite the user message to be clear, concise, and polite. Output only the message.";

/// Default page size for the inbox listing.
pub const INBOX_LIMIT: usize = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub recipient_id: String,
    pub raw_message: String,
    #[serde(default)]
    pub context: Option<String>,
    /// Display-name override for the sender.
    #[serde(default)]
    pub from_name: Option<String>,
}

/// What happened to one relayed message.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayReceipt {
    pub message: RelayMessage,
    pub rewritten: Graceful<String>,
    pub mirrored: bool,
}

fn rewrite_prompt(sender: &str, context: Option<&str>, raw: &str) -> String {
    let context = context.map(str::trim).filter(|c| !c.is_empty()).unwrap_or("N/A");
    format!(
        "Rewrite the following message to be delivered from {} to the recipient. Be clear, concise, polite, and keep the original meaning. Output only the final message body without quotes.\n\nContext (optional): {}\n\nOriginal message:\n{}",
        sender, context, raw
    )
}

/// Override when non-empty, else the sender's display name.
pub fn sender_name(identity: &Identity, override_name: Option<&str>) -> String {
    override_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| Some(identity.display_name.trim()).filter(|n| !n.is_empty()))
        .unwrap_or(ANONYMOUS_SENDER)
        .to_string()
}

#[derive(Clone)]
pub struct PeerRelay {
    store: Arc<dyn Store>,
    provider: Arc<dyn CompletionProvider>,
    max_chars: usize,
}

impl PeerRelay {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn CompletionProvider>,
        max_chars: usize,
    ) -> Self {
        Self {
            store,
            provider,
            max_chars,
        }
    }

    pub async fn relay(
        &self,
        sender: &Identity,
        request: RelayRequest,
    ) -> Result<RelayReceipt, ChatError> {
        let raw = request.raw_message.trim();
        if raw.is_empty() {
            return Err(ChatError::validation("message must not be empty"));
        }
        if raw.chars().count() > self.max_chars {
            return Err(ChatError::validation(format!(
                "message exceeds {} characters",
                self.max_chars
            )));
        }
        let recipient = self
            .store
            .get_user(&request.recipient_id)
            .await
            .map_err(ChatError::persistence)?
            .ok_or(ChatError::NotFound)?;

        let name = sender_name(sender, request.from_name.as_deref());
        let rewritten = self.rewrite(&name, request.context.as_deref(), raw).await;

        let message = RelayMessage {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender.user_id.clone(),
            recipient_id: recipient.id.clone(),
            sender_name: name,
            content: rewritten.value().clone(),
            read: false,
            created_at: Utc::now(),
        };
        self.store
            .insert_relay(&message)
            .await
            .map_err(ChatError::persistence)?;

        let mirrored = match self.mirror(&message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(recipient_id = %message.recipient_id, error = %format!("{:#}", e), "relay mirror failed");
                false
            }
        };
        info!(
            sender_id = %message.sender_id,
            recipient_id = %message.recipient_id,
            rewritten = !rewritten.is_defaulted(),
            mirrored,
            "message relayed"
        );
        Ok(RelayReceipt {
            message,
            rewritten,
            mirrored,
        })
    }

    async fn rewrite(&self, sender: &str, context: Option<&str>, raw: &str) -> Graceful<String> {
        let request = CompletionRequest::new(
            CallPurpose::Relay,
            Tier::Fast,
            vec![
                ChatTurn::system(RELAY_SYSTEM_PROMPT),
                ChatTurn::user(rewrite_prompt(sender, context, raw)),
            ],
        );
        match self.provider.complete(request).await {
            Ok(text) if !text.trim().is_empty() => Graceful::Produced(text.trim().to_string()),
            Ok(_) => Graceful::defaulted(raw.to_string(), "empty rewrite"),
            Err(e) => {
                warn!(error = %e, "relay rewrite failed; delivering the original text");
                Graceful::defaulted(raw.to_string(), e.to_string())
            }
        }
    }

    /// Append the relayed text to the recipient's `Messages` conversation,
    /// creating it on first use.
    async fn mirror(&self, message: &RelayMessage) -> anyhow::Result<()> {
        let conversation = match self
            .store
            .find_conversation_by_title(&message.recipient_id, MIRROR_TITLE)
            .await?
        {
            Some(c) => c,
            None => {
                let mut c = Conversation::new(&message.recipient_id);
                c.title = Some(MIRROR_TITLE.to_string());
                self.store.create_conversation(&c).await?;
                c
            }
        };
        let entry = Message::new(
            &conversation.id,
            MessageRole::System,
            format!("{}: {}", message.sender_name, message.content),
        );
        self.store.append_message(&entry).await?;
        self.store
            .touch_conversation(&conversation.id, entry.created_at, None)
            .await
    }

    pub async fn unread_count(&self, recipient: &Identity) -> Result<u64, ChatError> {
        self.store
            .count_unread(&recipient.user_id)
            .await
            .map_err(ChatError::persistence)
    }

    /// Newest relayed messages for `recipient`; the returned ones are marked
    /// read.
    pub async fn inbox(&self, recipient: &Identity, limit: usize) -> Result<Vec<RelayMessage>, ChatError> {
        let messages = self
            .store
            .list_inbox(&recipient.user_id, limit)
            .await
            .map_err(ChatError::persistence)?;
        let unread: Vec<String> = messages
            .iter()
            .filter(|m| !m.read)
            .map(|m| m.id.clone())
            .collect();
        if !unread.is_empty() {
            self.store
                .mark_relay_read(&recipient.user_id, &unread)
                .await
                .map_err(ChatError::persistence)?;
        }
        Ok(messages)
    }
}
