//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`migrate::apply`](crate::migrate::apply). Ownership checks are part of
//! the `WHERE` clause, so a foreign conversation is indistinguishable from a
//! missing one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use chathome_core::models::{
    AttachmentRef, Conversation, ConversationSummary, Message, MessageRole, RelayMessage, Role,
    Tier, User,
};
use chathome_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        handle: row.get("handle"),
        display_name: row.get("display_name"),
        role: role.parse::<Role>()?,
        secret: row.get("secret"),
        created_at: from_millis(row.get("created_at")),
    })
}

fn conversation_from_row(row: &SqliteRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let role: String = row.get("role");
    let model: Option<String> = row.get("model");
    let attachments_json: Option<String> = row.get("attachments_json");
    let attachments: Vec<AttachmentRef> = match attachments_json {
        Some(json) => serde_json::from_str(&json).context("Corrupt attachments_json")?,
        None => Vec::new(),
    };
    Ok(Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: MessageRole::parse(&role)
            .with_context(|| format!("Unknown message role '{}'", role))?,
        content: row.get("content"),
        model: model.as_deref().and_then(|m| Tier::parse_selector(m).ok()),
        attachments,
        created_at: from_millis(row.get("created_at")),
    })
}

fn relay_from_row(row: &SqliteRow) -> RelayMessage {
    let is_read: i64 = row.get("is_read");
    RelayMessage {
        id: row.get("id"),
        sender_id: row.get("sender_id"),
        recipient_id: row.get("recipient_id"),
        sender_name: row.get("sender_name"),
        content: row.get("content"),
        read: is_read != 0,
        created_at: from_millis(row.get("created_at")),
    }
}

const CONVERSATION_COLUMNS: &str = "id, owner_id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, role, content, model, attachments_json, created_at";

#[async_trait]
impl Store for SqliteStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, handle, display_name, role, secret, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.handle)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(&user.secret)
        .bind(to_millis(user.created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert user '{}'", user.handle))?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE handle = ?")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at, rowid")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.owner_id, c.title, c.created_at, c.updated_at,
                   (SELECT m.content FROM messages m
                     WHERE m.conversation_id = c.id
                     ORDER BY m.created_at DESC, m.rowid DESC
                     LIMIT 1) AS last_message
            FROM conversations c
            WHERE c.owner_id = ?
            ORDER BY c.updated_at DESC, c.rowid DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ConversationSummary {
                conversation: conversation_from_row(row),
                last_message: row.get("last_message"),
            })
            .collect())
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations (id, owner_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(&conversation.owner_id)
        .bind(&conversation.title)
        .bind(to_millis(conversation.created_at))
        .bind(to_millis(conversation.updated_at))
        .execute(&self.pool)
        .await
        .context("Failed to insert conversation")?;
        Ok(())
    }

    async fn get_conversation(&self, owner_id: &str, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM conversations WHERE id = ? AND owner_id = ?",
            CONVERSATION_COLUMNS
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn find_conversation_by_title(
        &self,
        owner_id: &str,
        title: &str,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM conversations WHERE owner_id = ? AND title = ? ORDER BY updated_at DESC, rowid DESC LIMIT 1",
            CONVERSATION_COLUMNS
        ))
        .bind(owner_id)
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {cols} FROM (
                SELECT {cols}, rowid AS seq FROM messages
                WHERE conversation_id = ?
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?
            )
            ORDER BY created_at ASC, seq ASC
            "#,
            cols = MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn append_message(&self, message: &Message) -> Result<()> {
        let attachments_json = if message.attachments.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.attachments)?)
        };
        sqlx::query(&format!(
            "INSERT INTO messages ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
            MESSAGE_COLUMNS
        ))
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.model.map(|t| t.as_str()))
        .bind(attachments_json)
        .bind(to_millis(message.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;
        Ok(())
    }

    async fn touch_conversation(
        &self,
        id: &str,
        at: DateTime<Utc>,
        title: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversations SET updated_at = ?, title = COALESCE(?, title) WHERE id = ?",
        )
        .bind(to_millis(at))
        .bind(title)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update conversation")?;
        Ok(())
    }

    async fn rename_conversation(&self, owner_id: &str, id: &str, title: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
        )
        .bind(title)
        .bind(to_millis(Utc::now()))
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_conversation(&self, owner_id: &str, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let owned: Option<String> =
            sqlx::query_scalar("SELECT id FROM conversations WHERE id = ? AND owner_id = ?")
                .bind(id)
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await?;
        if owned.is_none() {
            return Ok(false);
        }
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn insert_relay(&self, message: &RelayMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO relay_messages (id, sender_id, recipient_id, sender_name, content, is_read, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(&message.recipient_id)
        .bind(&message.sender_name)
        .bind(&message.content)
        .bind(message.read as i64)
        .bind(to_millis(message.created_at))
        .execute(&self.pool)
        .await
        .context("Failed to insert relay message")?;
        Ok(())
    }

    async fn count_unread(&self, recipient_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM relay_messages WHERE recipient_id = ? AND is_read = 0",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_inbox(&self, recipient_id: &str, limit: usize) -> Result<Vec<RelayMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM relay_messages WHERE recipient_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(recipient_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(relay_from_row).collect())
    }

    async fn mark_relay_read(&self, recipient_id: &str, ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for id in ids {
            let result = sqlx::query(
                "UPDATE relay_messages SET is_read = 1 WHERE id = ? AND recipient_id = ? AND is_read = 0",
            )
            .bind(id)
            .bind(recipient_id)
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected();
        }
        tx.commit().await?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use chrono::Duration;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&dir.path().join("chat.sqlite")).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        // Second run must be a no-op.
        migrate::apply(&pool).await.unwrap();
        (dir, SqliteStore::new(pool))
    }

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            handle: id.into(),
            display_name: id.to_uppercase(),
            role: Role::Kid,
            secret: Some("hash".into()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn user_round_trip_and_unique_handle() {
        let (_dir, store) = store().await;
        store.insert_user(&user("alice")).await.unwrap();
        let got = store.find_user_by_handle("alice").await.unwrap().unwrap();
        assert_eq!(got.role, Role::Kid);
        assert_eq!(got.secret.as_deref(), Some("hash"));
        assert!(store.insert_user(&user("alice")).await.is_err());
    }

    #[tokio::test]
    async fn foreign_conversation_looks_missing() {
        let (_dir, store) = store().await;
        store.insert_user(&user("alice")).await.unwrap();
        store.insert_user(&user("bob")).await.unwrap();
        let conv = Conversation::new("alice");
        store.create_conversation(&conv).await.unwrap();

        assert!(store.get_conversation("bob", &conv.id).await.unwrap().is_none());
        assert!(store.get_conversation("bob", "nope").await.unwrap().is_none());
        assert!(!store.delete_conversation("bob", &conv.id).await.unwrap());
        assert!(!store.rename_conversation("bob", &conv.id, "x").await.unwrap());
        assert!(store.list_conversations("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn messages_keep_order_attachments_and_model() {
        let (_dir, store) = store().await;
        store.insert_user(&user("alice")).await.unwrap();
        let conv = Conversation::new("alice");
        store.create_conversation(&conv).await.unwrap();

        let at = Utc::now();
        let mut first = Message::new(&conv.id, MessageRole::User, "look at this");
        first.created_at = at;
        first.attachments = vec![AttachmentRef {
            key: "alice/1-a.png".into(),
            name: "a.png".into(),
            size: 3,
            content_type: "image/png".into(),
        }];
        // Same millisecond: rowid decides.
        let mut second = Message::new(&conv.id, MessageRole::Assistant, "a cat");
        second.created_at = at;
        second.model = Some(Tier::Fast);
        let mut third = Message::new(&conv.id, MessageRole::User, "thanks");
        third.created_at = at + Duration::milliseconds(5);

        for m in [&first, &second, &third] {
            store.append_message(m).await.unwrap();
        }

        let all = store.list_messages(&conv.id, None).await.unwrap();
        let texts: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["look at this", "a cat", "thanks"]);
        assert_eq!(all[0].attachments.len(), 1);
        assert_eq!(all[1].model, Some(Tier::Fast));
        assert_eq!(all[0].model, None);

        let window = store.list_messages(&conv.id, Some(2)).await.unwrap();
        assert_eq!(window[0].content, "a cat");
        assert_eq!(window[1].content, "thanks");
    }

    #[tokio::test]
    async fn touch_sets_title_only_when_given() {
        let (_dir, store) = store().await;
        store.insert_user(&user("alice")).await.unwrap();
        let conv = Conversation::new("alice");
        store.create_conversation(&conv).await.unwrap();

        store
            .touch_conversation(&conv.id, Utc::now(), Some("Paris Weather"))
            .await
            .unwrap();
        store
            .touch_conversation(&conv.id, Utc::now(), None)
            .await
            .unwrap();
        let got = store.get_conversation("alice", &conv.id).await.unwrap().unwrap();
        assert_eq!(got.title.as_deref(), Some("Paris Weather"));
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let (_dir, store) = store().await;
        store.insert_user(&user("alice")).await.unwrap();
        let conv = Conversation::new("alice");
        store.create_conversation(&conv).await.unwrap();
        store
            .append_message(&Message::new(&conv.id, MessageRole::User, "hi"))
            .await
            .unwrap();

        assert!(store.delete_conversation("alice", &conv.id).await.unwrap());
        assert!(store.list_messages(&conv.id, None).await.unwrap().is_empty());
        assert!(store.get_conversation("alice", &conv.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn relay_inbox_newest_first_and_read_flag() {
        let (_dir, store) = store().await;
        let base = Utc::now();
        for (i, id) in ["r1", "r2"].iter().enumerate() {
            store
                .insert_relay(&RelayMessage {
                    id: id.to_string(),
                    sender_id: "bob".into(),
                    recipient_id: "alice".into(),
                    sender_name: "Bob".into(),
                    content: format!("note {}", i),
                    read: false,
                    created_at: base + Duration::seconds(i as i64),
                })
                .await
                .unwrap();
        }
        let inbox = store.list_inbox("alice", 10).await.unwrap();
        assert_eq!(inbox[0].id, "r2");
        assert_eq!(store.count_unread("alice").await.unwrap(), 2);
        let ids: Vec<String> = inbox.iter().map(|m| m.id.clone()).collect();
        assert_eq!(store.mark_relay_read("alice", &ids).await.unwrap(), 2);
        assert_eq!(store.count_unread("alice").await.unwrap(), 0);
    }
}
