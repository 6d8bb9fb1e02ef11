//! Bearer sessions written by the external token issuer

use super::{from_millis, to_millis, Store};
use crate::core::error::Result;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub token: String,
    pub identity_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Store {
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (token, identity_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(&session.identity_id)
        .bind(to_millis(session.created_at))
        .bind(to_millis(session.expires_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn find_session(&self, token: &str) -> Result<Option<SessionRecord>> {
        let row: Option<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT token, identity_id, created_at, expires_at FROM sessions WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(token, identity_id, created_at, expires_at)| SessionRecord {
            token,
            identity_id,
            created_at: from_millis(created_at),
            expires_at: from_millis(expires_at),
        }))
    }

    pub async fn delete_session(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
