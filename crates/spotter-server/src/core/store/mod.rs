//! SQLite-backed document store
//!
//! Every mutation is a filtered conditional statement (status guards,
//! tombstone guards, UNIQUE pair keys) so concurrent handlers never lose
//! updates. Timestamps are stored as Unix milliseconds.

pub mod calendar;
pub mod identities;
pub mod messages;
pub mod relationships;
pub mod sessions;

use crate::core::error::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS identities (
        id TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        email TEXT,
        preference_tags TEXT NOT NULL DEFAULT '[]'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        identity_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS friend_requests (
        id TEXT PRIMARY KEY,
        pair_key TEXT NOT NULL UNIQUE,
        sender_id TEXT NOT NULL,
        recipient_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at INTEGER NOT NULL,
        responded_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS friendships (
        id TEXT PRIMARY KEY,
        pair_key TEXT NOT NULL UNIQUE,
        user_a TEXT NOT NULL,
        user_b TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS friendship_hidden (
        friendship_id TEXT NOT NULL REFERENCES friendships(id),
        user_id TEXT NOT NULL,
        PRIMARY KEY (friendship_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        sender_id TEXT NOT NULL,
        recipient_id TEXT NOT NULL,
        content TEXT NOT NULL,
        read INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages (sender_id, recipient_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages (recipient_id, read)",
    r#"
    CREATE TABLE IF NOT EXISTS message_hidden (
        message_id TEXT NOT NULL REFERENCES messages(id),
        user_id TEXT NOT NULL,
        PRIMARY KEY (message_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS calendar_events (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        title TEXT NOT NULL,
        start_at INTEGER NOT NULL,
        end_at INTEGER NOT NULL,
        shared INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_calendar_owner_start ON calendar_events (owner_id, start_at)",
];

/// Shared handle to the persistent store
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database file at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(options).await
    }

    /// Open from a `sqlite:` URL
    pub async fn open_url(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        info!("[Store] Opened database");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Decode a `json_group_array` column into a set of user ids.
pub(crate) fn hidden_set(raw: &str) -> Result<BTreeSet<String>> {
    Ok(serde_json::from_str(raw)?)
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_support::temp_store;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let (_dir, store) = temp_store().await;
        store.init_schema().await.unwrap();
        store.init_schema().await.unwrap();
    }

    #[test]
    fn millis_round_trip_keeps_precision() {
        let at = from_millis(1_700_000_000_123);
        assert_eq!(to_millis(at), 1_700_000_000_123);
    }

    #[test]
    fn hidden_set_decodes_group_array() {
        let set = hidden_set(r#"["b","a"]"#).unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(hidden_set("[]").unwrap().is_empty());
    }
}
