//! Core data models shared by the store, the send pipeline, and the HTTP layer.
//!
//! Timestamps are `DateTime<Utc>`; stores persist them as Unix milliseconds so
//! that two messages written within the same second still order correctly.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Closed set of user roles. Governs prompt tone and content policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Adult,
    Kid,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Adult => "adult",
            Role::Kid => "kid",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "adult" => Ok(Role::Adult),
            "kid" => Ok(Role::Kid),
            other => Err(ChatError::ValidationFailed(format!(
                "unknown role '{}': must be admin, adult, or kid",
                other
            ))),
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Stable login handle.
    pub handle: String,
    pub display_name: String,
    pub role: Role,
    /// Opaque credential material owned by the (external) auth service.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The caller identity resolved by the identity gate for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    pub display_name: String,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            role: user.role,
            display_name: user.display_name.clone(),
        }
    }
}

/// A conversation owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A fresh, untitled conversation for `owner_id`.
    pub fn new(owner_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Conversation row plus a preview of its latest message, for list views.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message: Option<String>,
}

/// Who authored a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

/// Reference to an uploaded blob, echoed with its declared metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub key: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

/// An immutable message inside a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Tier that produced the message; `None` for user and system turns.
    pub model: Option<Tier>,
    pub attachments: Vec<AttachmentRef>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(conversation_id: &str, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.into(),
            model: None,
            attachments: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Conversation with its full, ordered message list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationWithMessages {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Model-selection bucket.
///
/// | Tier | Sampling | Vision |
/// |------|----------|--------|
/// | `fast` | moderate temperature | yes |
/// | `thinking` | fixed reasoning effort | no |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Fast,
    Thinking,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Thinking => "thinking",
        }
    }

    /// Parse a caller-supplied selector.
    ///
    /// Accepts the tier names plus the coarse effort aliases `minimal` and
    /// `medium` used by older clients.
    pub fn parse_selector(selector: &str) -> Result<Self, ChatError> {
        match selector.trim().to_ascii_lowercase().as_str() {
            "fast" | "minimal" => Ok(Tier::Fast),
            "thinking" | "medium" => Ok(Tier::Thinking),
            other => Err(ChatError::ValidationFailed(format!(
                "invalid model tier '{}': must be fast or thinking",
                other
            ))),
        }
    }

    pub fn supports_vision(&self) -> bool {
        matches!(self, Tier::Fast)
    }

    /// The cheapest tier that accepts image input.
    pub fn vision_fallback() -> Self {
        Tier::Fast
    }

    /// Tier actually used for a completion: image input forces the vision
    /// fallback regardless of what was requested.
    pub fn effective(requested: Tier, vision_required: bool) -> Tier {
        if vision_required {
            Tier::vision_fallback()
        } else {
            requested
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A human-to-human message delivered through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_name: String,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_selector_accepts_names_and_aliases() {
        assert_eq!(Tier::parse_selector("fast").unwrap(), Tier::Fast);
        assert_eq!(Tier::parse_selector("Thinking").unwrap(), Tier::Thinking);
        assert_eq!(Tier::parse_selector("minimal").unwrap(), Tier::Fast);
        assert_eq!(Tier::parse_selector("medium").unwrap(), Tier::Thinking);
    }

    #[test]
    fn tier_selector_rejects_unknown() {
        let err = Tier::parse_selector("turbo").unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailed(_)));
    }

    #[test]
    fn vision_forces_fast_tier() {
        assert_eq!(Tier::effective(Tier::Thinking, true), Tier::Fast);
        assert_eq!(Tier::effective(Tier::Fast, true), Tier::Fast);
        assert_eq!(Tier::effective(Tier::Thinking, false), Tier::Thinking);
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::Admin, Role::Adult, Role::Kid] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("teen".parse::<Role>().is_err());
    }

    #[test]
    fn message_serializes_camel_case() {
        let msg = Message::new("c1", MessageRole::User, "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["role"], "user");
        assert!(json["model"].is_null());
    }
}
