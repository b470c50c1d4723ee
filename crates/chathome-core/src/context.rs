//! Context assembly: turns persisted history, the new user message, extracted
//! attachment content, and optional search grounding into the ordered
//! message list sent to the completion provider.
//!
//! The output always has exactly one leading system entry, followed by the
//! history window oldest to newest, followed by the new user turn. Nothing is
//! reordered or deduplicated.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::models::{Message, MessageRole, Role, Tier};
use crate::prompt;

/// Default number of persisted messages included as history.
pub const DEFAULT_HISTORY_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

/// One entry of a chat-completions `messages` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: TurnContent,
}

impl ChatTurn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: TurnContent::Text(text.into()),
        }
    }
}

/// Plain string, or a list of typed blocks for multimodal input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// What the attachment extractor produced for one attachment.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentContent {
    /// Base64 `data:` URI for vision input.
    InlineImage { data_uri: String },
    /// Marker-wrapped extracted text (or an explicit failure marker).
    Text { text: String },
}

impl AttachmentContent {
    pub fn is_image(&self) -> bool {
        matches!(self, AttachmentContent::InlineImage { .. })
    }
}

/// True when any attachment needs a vision-capable tier.
pub fn requires_vision(attachments: &[AttachmentContent]) -> bool {
    attachments.iter().any(AttachmentContent::is_image)
}

/// Everything the assembler needs for one exchange.
#[derive(Debug, Clone)]
pub struct AssemblyInput<'a> {
    pub role: Role,
    pub display_name: &'a str,
    /// Persisted messages, oldest first, not including the new user message.
    pub history: &'a [Message],
    pub history_window: usize,
    pub user_text: &'a str,
    pub attachments: &'a [AttachmentContent],
    pub search_context: Option<&'a str>,
    /// Tier the completion will run on, after any vision downgrade.
    pub tier: Tier,
}

/// Final message list for the completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub messages: Vec<ChatTurn>,
}

impl AssembledContext {
    /// The leading system instruction.
    pub fn system(&self) -> &str {
        match self.messages.first().map(|t| &t.content) {
            Some(TurnContent::Text(s)) => s,
            _ => "",
        }
    }
}

/// Map the most recent `window` stored messages into turns, oldest first.
///
/// Stored content passes through unchanged. System-attributed messages (relay
/// mirrors) are presented to the model as assistant turns so the single
/// leading system instruction stays the only one.
pub fn history_turns(history: &[Message], window: usize) -> Vec<ChatTurn> {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .map(|m| ChatTurn {
            role: match m.role {
                MessageRole::User => TurnRole::User,
                MessageRole::Assistant | MessageRole::System => TurnRole::Assistant,
            },
            content: TurnContent::Text(m.content.clone()),
        })
        .collect()
}

/// Build the new user turn: plain text without attachments, otherwise the
/// typed text followed by each attachment block in order.
pub fn user_turn(text: &str, attachments: &[AttachmentContent]) -> ChatTurn {
    if attachments.is_empty() {
        return ChatTurn::user(text);
    }
    let mut parts = Vec::with_capacity(attachments.len() + 1);
    parts.push(ContentPart::Text {
        text: text.to_string(),
    });
    for att in attachments {
        parts.push(match att {
            AttachmentContent::InlineImage { data_uri } => ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: data_uri.clone(),
                },
            },
            AttachmentContent::Text { text } => ContentPart::Text { text: text.clone() },
        });
    }
    ChatTurn {
        role: TurnRole::User,
        content: TurnContent::Parts(parts),
    }
}

/// Assemble the completion input.
///
/// Fails with `ValidationFailed` if image blocks are present but `tier`
/// cannot accept them; callers are expected to have applied
/// [`Tier::effective`] already.
pub fn assemble(input: AssemblyInput<'_>) -> Result<AssembledContext, ChatError> {
    if requires_vision(input.attachments) && !input.tier.supports_vision() {
        return Err(ChatError::validation(format!(
            "model tier '{}' does not accept image input",
            input.tier
        )));
    }

    let system = prompt::system_instruction(input.role, input.display_name, input.search_context);
    let history = history_turns(input.history, input.history_window);

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatTurn::system(system));
    messages.extend(history);
    messages.push(user_turn(input.user_text, input.attachments));

    Ok(AssembledContext { messages })
}
