//! Storage abstraction for ChatHome.
//!
//! The [`Store`] trait covers users, conversations, messages, and the relay
//! log. Backends: [`memory::InMemoryStore`] here, and the SQLite store in the
//! `chathome` crate.
//!
//! Every method that takes a conversation id together with an owner id must
//! treat "exists but belongs to someone else" exactly like "does not exist".
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Conversation, ConversationSummary, ConversationWithMessages, Message, RelayMessage, User,
};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list_conversations`](Store::list_conversations) | Owner's conversations, most recently updated first |
/// | [`create_conversation`](Store::create_conversation) | Insert a new conversation row |
/// | [`get_conversation`](Store::get_conversation) | Owner-checked lookup |
/// | [`get_with_messages`](Store::get_with_messages) | Owner-checked lookup plus full history |
/// | [`append_message`](Store::append_message) | Add an immutable message |
/// | [`touch_conversation`](Store::touch_conversation) | Advance `updated_at`, optionally set the title |
/// | [`delete_conversation`](Store::delete_conversation) | Owner-checked delete, cascades to messages |
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<()>;

    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<User>>;

    async fn list_users(&self) -> Result<Vec<User>>;

    /// Conversations owned by `owner_id`, ordered by `updated_at` descending,
    /// each with a preview of its newest message.
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<ConversationSummary>>;

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Returns `None` when the conversation is missing or not owned by `owner_id`.
    async fn get_conversation(&self, owner_id: &str, id: &str) -> Result<Option<Conversation>>;

    /// Most recently updated conversation of `owner_id` whose title equals `title`.
    async fn find_conversation_by_title(
        &self,
        owner_id: &str,
        title: &str,
    ) -> Result<Option<Conversation>>;

    /// Messages of a conversation in creation order. With `limit`, only the
    /// most recent `limit` messages are returned (still oldest first).
    async fn list_messages(&self, conversation_id: &str, limit: Option<usize>)
        -> Result<Vec<Message>>;

    async fn append_message(&self, message: &Message) -> Result<()>;

    /// Set `updated_at` to `at`, and the title when `title` is given.
    async fn touch_conversation(
        &self,
        id: &str,
        at: DateTime<Utc>,
        title: Option<&str>,
    ) -> Result<()>;

    /// Explicit rename. Returns `false` when not found / not owned.
    async fn rename_conversation(&self, owner_id: &str, id: &str, title: &str) -> Result<bool>;

    /// Delete a conversation and its messages. Returns `false` when not
    /// found / not owned.
    async fn delete_conversation(&self, owner_id: &str, id: &str) -> Result<bool>;

    async fn insert_relay(&self, message: &RelayMessage) -> Result<()>;

    async fn count_unread(&self, recipient_id: &str) -> Result<u64>;

    /// Relay messages received by `recipient_id`, newest first.
    async fn list_inbox(&self, recipient_id: &str, limit: usize) -> Result<Vec<RelayMessage>>;

    /// Mark the given relay messages read, only if addressed to `recipient_id`.
    async fn mark_relay_read(&self, recipient_id: &str, ids: &[String]) -> Result<u64>;

    /// Owner-checked conversation plus its complete message list.
    async fn get_with_messages(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<ConversationWithMessages>> {
        let Some(conversation) = self.get_conversation(owner_id, id).await? else {
            return Ok(None);
        };
        let messages = self.list_messages(&conversation.id, None).await?;
        Ok(Some(ConversationWithMessages {
            conversation,
            messages,
        }))
    }
}
