//! Direct messages with per-user tombstones and read state

use super::{from_millis, hidden_set, to_millis, Store};
use crate::core::error::{Error, Result};
use crate::core::models::Message;

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    sender_id: String,
    recipient_id: String,
    content: String,
    read: bool,
    created_at: i64,
    hidden_for: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            content: row.content,
            read: row.read,
            hidden_for: hidden_set(&row.hidden_for)?,
            created_at: from_millis(row.created_at),
        })
    }
}

fn collect(rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    rows.into_iter().map(Message::try_from).collect()
}

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.sender_id, m.recipient_id, m.content, m.read, m.created_at,
           (SELECT json_group_array(h.user_id) FROM message_hidden h
             WHERE h.message_id = m.id) AS hidden_for
    FROM messages m
"#;

/// `m` is visible to the bound user
const VISIBLE_TO: &str =
    "NOT EXISTS (SELECT 1 FROM message_hidden h WHERE h.message_id = m.id AND h.user_id = ?)";

impl Store {
    pub async fn insert_message(&self, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, sender_id, recipient_id, content, read, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.sender_id)
        .bind(&message.recipient_id)
        .bind(&message.content)
        .bind(message.read)
        .bind(to_millis(message.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn find_message(&self, id: &str) -> Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!("{} WHERE m.id = ?", MESSAGE_SELECT))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(Message::try_from).transpose()
    }

    /// Messages between the pair visible to `caller`, oldest first
    pub async fn conversation(&self, caller: &str, other: &str) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"
            {select}
            WHERE ((m.sender_id = ? AND m.recipient_id = ?)
                OR (m.sender_id = ? AND m.recipient_id = ?))
              AND {visible}
            ORDER BY m.created_at ASC, m.rowid ASC
            "#,
            select = MESSAGE_SELECT,
            visible = VISIBLE_TO,
        ))
        .bind(caller)
        .bind(other)
        .bind(other)
        .bind(caller)
        .bind(caller)
        .fetch_all(self.pool())
        .await?;

        collect(rows)
    }

    /// Flip unread messages from `other` to `caller` to read. Returns the ids
    /// this call changed; a concurrent or repeated call gets none of them.
    pub async fn mark_read(&self, caller: &str, other: &str) -> Result<Vec<String>> {
        let ids: Vec<(String,)> = sqlx::query_as(&format!(
            r#"
            UPDATE messages AS m SET read = 1
            WHERE m.sender_id = ? AND m.recipient_id = ? AND m.read = 0
              AND {visible}
            RETURNING id
            "#,
            visible = VISIBLE_TO,
        ))
        .bind(other)
        .bind(caller)
        .bind(caller)
        .fetch_all(self.pool())
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Every message involving `caller` and visible to them, newest first
    pub async fn messages_involving(&self, caller: &str) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"
            {select}
            WHERE (m.sender_id = ? OR m.recipient_id = ?)
              AND {visible}
            ORDER BY m.created_at DESC, m.rowid DESC
            "#,
            select = MESSAGE_SELECT,
            visible = VISIBLE_TO,
        ))
        .bind(caller)
        .bind(caller)
        .bind(caller)
        .fetch_all(self.pool())
        .await?;

        collect(rows)
    }

    pub async fn unread_count(&self, caller: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM messages m WHERE m.recipient_id = ? AND m.read = 0 AND {}",
            VISIBLE_TO
        ))
        .bind(caller)
        .bind(caller)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    /// Add `user_id` to a message's tombstone set
    pub async fn hide_message(&self, message_id: &str, user_id: &str) -> Result<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO message_hidden (message_id, user_id) VALUES (?, ?)")
                .bind(message_id)
                .bind(user_id)
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Hide every message between the pair not yet hidden for `caller`.
    /// Returns how many were newly hidden.
    pub async fn hide_conversation(&self, caller: &str, other: &str) -> Result<u64> {
        let result = sqlx::query(&format!(
            r#"
            INSERT OR IGNORE INTO message_hidden (message_id, user_id)
            SELECT m.id, ? FROM messages m
            WHERE ((m.sender_id = ? AND m.recipient_id = ?)
                OR (m.sender_id = ? AND m.recipient_id = ?))
              AND {visible}
            "#,
            visible = VISIBLE_TO,
        ))
        .bind(caller)
        .bind(caller)
        .bind(other)
        .bind(other)
        .bind(caller)
        .bind(caller)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_support::temp_store;

    #[tokio::test]
    async fn hidden_messages_drop_out_for_one_side_only() {
        let (_dir, store) = temp_store().await;
        let first = Message::new("a", "b", "first");
        let second = Message::new("b", "a", "second");
        store.insert_message(&first).await.unwrap();
        store.insert_message(&second).await.unwrap();

        assert!(store.hide_message(&first.id, "a").await.unwrap());

        let for_a = store.conversation("a", "b").await.unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].content, "second");

        let for_b = store.conversation("b", "a").await.unwrap();
        assert_eq!(
            for_b.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            ["first", "second"]
        );
        assert!(for_b[0].hidden_for.contains("a"));
    }

    #[tokio::test]
    async fn mark_read_reports_each_message_once() {
        let (_dir, store) = temp_store().await;
        let message = Message::new("a", "b", "hey");
        store.insert_message(&message).await.unwrap();
        assert_eq!(store.unread_count("b").await.unwrap(), 1);

        assert_eq!(store.mark_read("b", "a").await.unwrap(), vec![message.id.clone()]);
        assert!(store.mark_read("b", "a").await.unwrap().is_empty());
        assert_eq!(store.unread_count("b").await.unwrap(), 0);
        assert!(store.find_message(&message.id).await.unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn hide_conversation_skips_already_hidden() {
        let (_dir, store) = temp_store().await;
        let one = Message::new("a", "b", "one");
        let two = Message::new("b", "a", "two");
        let other_pair = Message::new("a", "c", "elsewhere");
        for m in [&one, &two, &other_pair] {
            store.insert_message(m).await.unwrap();
        }
        store.hide_message(&one.id, "a").await.unwrap();

        assert_eq!(store.hide_conversation("a", "b").await.unwrap(), 1);
        assert_eq!(store.hide_conversation("a", "b").await.unwrap(), 0);
        assert_eq!(store.messages_involving("a").await.unwrap().len(), 1);
    }
}
