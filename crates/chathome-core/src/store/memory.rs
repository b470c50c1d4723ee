//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Insertion order doubles as the
//! tiebreak for equal timestamps, matching the rowid tiebreak of SQLite.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Conversation, ConversationSummary, Message, RelayMessage, User};

use super::Store;

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<Vec<User>>,
    conversations: RwLock<Vec<Conversation>>,
    messages: RwLock<Vec<Message>>,
    relay: RwLock<Vec<RelayMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().map_err(poisoned)?;
        if users.iter().any(|u| u.handle == user.handle) {
            return Err(anyhow!("user handle '{}' already exists", user.handle));
        }
        users.push(user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<User>> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.iter().find(|u| u.handle == handle).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.users.read().map_err(poisoned)?.clone())
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<ConversationSummary>> {
        let conversations = self.conversations.read().map_err(poisoned)?;
        let messages = self.messages.read().map_err(poisoned)?;

        let mut out: Vec<ConversationSummary> = conversations
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .map(|c| ConversationSummary {
                conversation: c.clone(),
                last_message: messages
                    .iter()
                    .rev()
                    .find(|m| m.conversation_id == c.id)
                    .map(|m| m.content.clone()),
            })
            .collect();
        // Stable: later inserts first among equal timestamps.
        out.reverse();
        out.sort_by(|a, b| b.conversation.updated_at.cmp(&a.conversation.updated_at));
        Ok(out)
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut conversations = self.conversations.write().map_err(poisoned)?;
        if conversations.iter().any(|c| c.id == conversation.id) {
            return Err(anyhow!("conversation '{}' already exists", conversation.id));
        }
        conversations.push(conversation.clone());
        Ok(())
    }

    async fn get_conversation(&self, owner_id: &str, id: &str) -> Result<Option<Conversation>> {
        let conversations = self.conversations.read().map_err(poisoned)?;
        Ok(conversations
            .iter()
            .find(|c| c.id == id && c.owner_id == owner_id)
            .cloned())
    }

    async fn find_conversation_by_title(
        &self,
        owner_id: &str,
        title: &str,
    ) -> Result<Option<Conversation>> {
        let conversations = self.conversations.read().map_err(poisoned)?;
        Ok(conversations
            .iter()
            .filter(|c| c.owner_id == owner_id && c.title.as_deref() == Some(title))
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        let messages = self.messages.read().map_err(poisoned)?;
        let mut all: Vec<Message> = messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        all.sort_by_key(|m| m.created_at);
        if let Some(limit) = limit {
            let start = all.len().saturating_sub(limit);
            all.drain(..start);
        }
        Ok(all)
    }

    async fn append_message(&self, message: &Message) -> Result<()> {
        let conversations = self.conversations.read().map_err(poisoned)?;
        if !conversations.iter().any(|c| c.id == message.conversation_id) {
            return Err(anyhow!(
                "conversation '{}' does not exist",
                message.conversation_id
            ));
        }
        self.messages
            .write()
            .map_err(poisoned)?
            .push(message.clone());
        Ok(())
    }

    async fn touch_conversation(
        &self,
        id: &str,
        at: DateTime<Utc>,
        title: Option<&str>,
    ) -> Result<()> {
        let mut conversations = self.conversations.write().map_err(poisoned)?;
        let conv = conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow!("conversation '{}' does not exist", id))?;
        conv.updated_at = at;
        if let Some(t) = title {
            conv.title = Some(t.to_string());
        }
        Ok(())
    }

    async fn rename_conversation(&self, owner_id: &str, id: &str, title: &str) -> Result<bool> {
        let mut conversations = self.conversations.write().map_err(poisoned)?;
        match conversations
            .iter_mut()
            .find(|c| c.id == id && c.owner_id == owner_id)
        {
            Some(conv) => {
                conv.title = Some(title.to_string());
                conv.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_conversation(&self, owner_id: &str, id: &str) -> Result<bool> {
        let mut conversations = self.conversations.write().map_err(poisoned)?;
        let before = conversations.len();
        conversations.retain(|c| !(c.id == id && c.owner_id == owner_id));
        if conversations.len() == before {
            return Ok(false);
        }
        self.messages
            .write()
            .map_err(poisoned)?
            .retain(|m| m.conversation_id != id);
        Ok(true)
    }

    async fn insert_relay(&self, message: &RelayMessage) -> Result<()> {
        self.relay.write().map_err(poisoned)?.push(message.clone());
        Ok(())
    }

    async fn count_unread(&self, recipient_id: &str) -> Result<u64> {
        let relay = self.relay.read().map_err(poisoned)?;
        Ok(relay
            .iter()
            .filter(|m| m.recipient_id == recipient_id && !m.read)
            .count() as u64)
    }

    async fn list_inbox(&self, recipient_id: &str, limit: usize) -> Result<Vec<RelayMessage>> {
        let relay = self.relay.read().map_err(poisoned)?;
        let mut inbox: Vec<RelayMessage> = relay
            .iter()
            .rev()
            .filter(|m| m.recipient_id == recipient_id)
            .cloned()
            .collect();
        inbox.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        inbox.truncate(limit);
        Ok(inbox)
    }

    async fn mark_relay_read(&self, recipient_id: &str, ids: &[String]) -> Result<u64> {
        let mut relay = self.relay.write().map_err(poisoned)?;
        let mut changed = 0;
        for m in relay
            .iter_mut()
            .filter(|m| m.recipient_id == recipient_id && !m.read && ids.contains(&m.id))
        {
            m.read = true;
            changed += 1;
        }
        Ok(changed)
    }
}
