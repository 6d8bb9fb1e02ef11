//! Identity directory (read side of the external identity subsystem)

use super::Store;
use crate::core::error::Result;
use crate::core::models::Identity;
use std::collections::BTreeSet;

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: String,
    display_name: String,
    email: Option<String>,
    preference_tags: String,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = crate::core::error::Error;

    fn try_from(row: IdentityRow) -> Result<Self> {
        let preference_tags: BTreeSet<String> = serde_json::from_str(&row.preference_tags)?;
        Ok(Identity {
            id: row.id,
            display_name: row.display_name,
            email: row.email,
            preference_tags,
        })
    }
}

fn collect(rows: Vec<IdentityRow>) -> Result<Vec<Identity>> {
    rows.into_iter().map(Identity::try_from).collect()
}

/// Escape LIKE wildcards so user input matches literally.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Store {
    /// Insert or refresh an identity as synced from the identity subsystem
    pub async fn upsert_identity(&self, identity: &Identity) -> Result<()> {
        let tags = serde_json::to_string(&identity.preference_tags)?;
        sqlx::query(
            r#"
            INSERT INTO identities (id, display_name, email, preference_tags)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email,
                preference_tags = excluded.preference_tags
            "#,
        )
        .bind(&identity.id)
        .bind(&identity.display_name)
        .bind(&identity.email)
        .bind(tags)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn find_identity(&self, id: &str) -> Result<Option<Identity>> {
        let row: Option<IdentityRow> = sqlx::query_as(
            "SELECT id, display_name, email, preference_tags FROM identities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(Identity::try_from).transpose()
    }

    /// Every identity except `id`, in id order
    pub async fn list_identities_except(&self, id: &str) -> Result<Vec<Identity>> {
        let rows: Vec<IdentityRow> = sqlx::query_as(
            "SELECT id, display_name, email, preference_tags FROM identities WHERE id != ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(self.pool())
        .await?;

        collect(rows)
    }

    /// Case-insensitive substring match on display name or email
    pub async fn search_identities(
        &self,
        exclude_id: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<Identity>> {
        let pattern = like_pattern(query);
        let rows: Vec<IdentityRow> = sqlx::query_as(
            r#"
            SELECT id, display_name, email, preference_tags
            FROM identities
            WHERE id != ?
              AND (display_name LIKE ? ESCAPE '\' OR email LIKE ? ESCAPE '\')
            ORDER BY display_name, id
            LIMIT ?
            "#,
        )
        .bind(exclude_id)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        collect(rows)
    }
}
