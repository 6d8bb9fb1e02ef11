//! Friend request and friendship records

use super::{from_millis, hidden_set, to_millis, Store};
use crate::core::error::{Error, Result};
use crate::core::models::{pair_key, FriendRequest, Friendship, Identity, RequestStatus};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: String,
    sender_id: String,
    recipient_id: String,
    status: String,
    created_at: i64,
    responded_at: Option<i64>,
}

impl TryFrom<RequestRow> for FriendRequest {
    type Error = Error;

    fn try_from(row: RequestRow) -> Result<Self> {
        Ok(FriendRequest {
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            status: row.status.parse().map_err(Error::Internal)?,
            created_at: from_millis(row.created_at),
            responded_at: row.responded_at.map(from_millis),
        })
    }
}

#[derive(sqlx::FromRow)]
struct FriendshipRow {
    id: String,
    user_a: String,
    user_b: String,
    created_at: i64,
    hidden_for: String,
}

impl TryFrom<FriendshipRow> for Friendship {
    type Error = Error;

    fn try_from(row: FriendshipRow) -> Result<Self> {
        Ok(Friendship {
            id: row.id,
            user_a: row.user_a,
            user_b: row.user_b,
            hidden_for: hidden_set(&row.hidden_for)?,
            created_at: from_millis(row.created_at),
        })
    }
}

/// Pending request joined with the identity on the other end
#[derive(sqlx::FromRow)]
struct PendingRow {
    id: String,
    sender_id: String,
    recipient_id: String,
    status: String,
    created_at: i64,
    responded_at: Option<i64>,
    other_id: String,
    other_display_name: String,
    other_email: Option<String>,
    other_preference_tags: String,
}

impl PendingRow {
    fn into_parts(row: Self) -> Result<(FriendRequest, Identity)> {
        let identity = Identity {
            id: row.other_id,
            display_name: row.other_display_name,
            email: row.other_email,
            preference_tags: serde_json::from_str(&row.other_preference_tags)?,
        };
        let request = FriendRequest::try_from(RequestRow {
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            status: row.status,
            created_at: row.created_at,
            responded_at: row.responded_at,
        })?;
        Ok((request, identity))
    }
}

const REQUEST_COLUMNS: &str = "id, sender_id, recipient_id, status, created_at, responded_at";

const FRIENDSHIP_SELECT: &str = r#"
    SELECT f.id, f.user_a, f.user_b, f.created_at,
           (SELECT json_group_array(h.user_id) FROM friendship_hidden h
             WHERE h.friendship_id = f.id) AS hidden_for
    FROM friendships f
"#;

impl Store {
    pub async fn find_request(&self, id: &str) -> Result<Option<FriendRequest>> {
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "SELECT {} FROM friend_requests WHERE id = ?",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(FriendRequest::try_from).transpose()
    }

    /// The single request record for the unordered pair, in whatever direction
    pub async fn find_request_for_pair(&self, a: &str, b: &str) -> Result<Option<FriendRequest>> {
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "SELECT {} FROM friend_requests WHERE pair_key = ?",
            REQUEST_COLUMNS
        ))
        .bind(pair_key(a, b))
        .fetch_optional(self.pool())
        .await?;

        row.map(FriendRequest::try_from).transpose()
    }

    /// Insert a new request. Fails with a unique violation when a record
    /// for the pair already exists.
    pub async fn insert_request(&self, request: &FriendRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO friend_requests
                (id, pair_key, sender_id, recipient_id, status, created_at, responded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.id)
        .bind(pair_key(&request.sender_id, &request.recipient_id))
        .bind(&request.sender_id)
        .bind(&request.recipient_id)
        .bind(request.status.as_str())
        .bind(to_millis(request.created_at))
        .bind(request.responded_at.map(to_millis))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Flip a resolved request back to pending in the caller's direction.
    /// Returns false when the record is no longer in `expected` status.
    pub async fn reopen_request(
        &self,
        id: &str,
        expected: RequestStatus,
        sender_id: &str,
        recipient_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE friend_requests
            SET status = 'pending', sender_id = ?, recipient_id = ?,
                created_at = ?, responded_at = NULL
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(sender_id)
        .bind(recipient_id)
        .bind(to_millis(at))
        .bind(id)
        .bind(expected.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Resolve a pending request sent by `sender_id`. Returns false when it
    /// is no longer pending from that sender.
    pub async fn resolve_request(
        &self,
        id: &str,
        sender_id: &str,
        status: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE friend_requests
            SET status = ?, responded_at = ?
            WHERE id = ? AND sender_id = ? AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(to_millis(at))
        .bind(id)
        .bind(sender_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark the pair's request record rejected, whatever its status
    pub async fn reject_request_for_pair(
        &self,
        a: &str,
        b: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE friend_requests
            SET status = 'rejected', responded_at = ?
            WHERE pair_key = ? AND status != 'rejected'
            "#,
        )
        .bind(to_millis(at))
        .bind(pair_key(a, b))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Pending requests addressed to `user_id`, newest first, with senders
    pub async fn pending_received(&self, user_id: &str) -> Result<Vec<(FriendRequest, Identity)>> {
        self.pending_with_counterpart(user_id, "recipient_id", "sender_id").await
    }

    /// Pending requests sent by `user_id`, newest first, with recipients
    pub async fn pending_sent(&self, user_id: &str) -> Result<Vec<(FriendRequest, Identity)>> {
        self.pending_with_counterpart(user_id, "sender_id", "recipient_id").await
    }

    async fn pending_with_counterpart(
        &self,
        user_id: &str,
        own_column: &'static str,
        other_column: &'static str,
    ) -> Result<Vec<(FriendRequest, Identity)>> {
        let rows: Vec<PendingRow> = sqlx::query_as(&format!(
            r#"
            SELECT r.id, r.sender_id, r.recipient_id, r.status, r.created_at, r.responded_at,
                   i.id AS other_id, i.display_name AS other_display_name,
                   i.email AS other_email, i.preference_tags AS other_preference_tags
            FROM friend_requests r
            JOIN identities i ON i.id = r.{other}
            WHERE r.{own} = ? AND r.status = 'pending'
            ORDER BY r.created_at DESC
            "#,
            own = own_column,
            other = other_column,
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(PendingRow::into_parts).collect()
    }

    /// Pending requests in either direction involving `user_id`
    pub async fn pending_involving(&self, user_id: &str) -> Result<Vec<FriendRequest>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            "SELECT {} FROM friend_requests WHERE (sender_id = ? OR recipient_id = ?) AND status = 'pending'",
            REQUEST_COLUMNS
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(FriendRequest::try_from).collect()
    }

    pub async fn find_friendship(&self, a: &str, b: &str) -> Result<Option<Friendship>> {
        let row: Option<FriendshipRow> =
            sqlx::query_as(&format!("{} WHERE f.pair_key = ?", FRIENDSHIP_SELECT))
                .bind(pair_key(a, b))
                .fetch_optional(self.pool())
                .await?;

        row.map(Friendship::try_from).transpose()
    }

    /// All friendship records touching `user_id`, hidden ones included
    pub async fn friendships_of(&self, user_id: &str) -> Result<Vec<Friendship>> {
        let rows: Vec<FriendshipRow> = sqlx::query_as(&format!(
            "{} WHERE f.user_a = ? OR f.user_b = ?",
            FRIENDSHIP_SELECT
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(Friendship::try_from).collect()
    }

    /// Accept a pending request from `sender_id` and materialize the pair's
    /// friendship in the same transaction. `None` when the request was no
    /// longer pending from that sender.
    pub async fn accept_request(
        &self,
        request: &FriendRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<(Friendship, bool)>> {
        let mut tx = self.pool().begin().await?;

        let accepted = sqlx::query(
            r#"
            UPDATE friend_requests
            SET status = 'accepted', responded_at = ?
            WHERE id = ? AND sender_id = ? AND status = 'pending'
            "#,
        )
        .bind(to_millis(at))
        .bind(&request.id)
        .bind(&request.sender_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !accepted {
            tx.rollback().await?;
            return Ok(None);
        }

        let created =
            upsert_friendship(&mut tx, &request.sender_id, &request.recipient_id, at).await?;
        tx.commit().await?;

        let friendship = self
            .load_friendship(&request.sender_id, &request.recipient_id)
            .await?;
        Ok(Some((friendship, created)))
    }

    async fn load_friendship(&self, a: &str, b: &str) -> Result<Friendship> {
        self.find_friendship(a, b).await?.ok_or_else(|| {
            Error::Internal(format!("friendship {} vanished after upsert", pair_key(a, b)))
        })
    }

    /// Add `user_id` to the friendship's tombstone set. Returns false when
    /// it was already hidden for that user.
    pub async fn hide_friendship(&self, friendship_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO friendship_hidden (friendship_id, user_id) VALUES (?, ?)",
        )
        .bind(friendship_id)
        .bind(user_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Identities on the other end of friendships not hidden for `user_id`
    pub async fn active_friends(&self, user_id: &str) -> Result<Vec<Identity>> {
        let rows: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
            r#"
            SELECT i.id, i.display_name, i.email, i.preference_tags
            FROM friendships f
            JOIN identities i
              ON i.id = CASE WHEN f.user_a = ? THEN f.user_b ELSE f.user_a END
            WHERE (f.user_a = ? OR f.user_b = ?)
              AND NOT EXISTS (
                  SELECT 1 FROM friendship_hidden h
                  WHERE h.friendship_id = f.id AND h.user_id = ?
              )
            ORDER BY i.display_name, i.id
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|(id, display_name, email, tags)| {
                Ok(Identity {
                    id,
                    display_name,
                    email,
                    preference_tags: serde_json::from_str(&tags)?,
                })
            })
            .collect()
    }
}

/// Insert the pair's friendship if missing and clear its tombstones
async fn upsert_friendship(
    tx: &mut Transaction<'_, Sqlite>,
    a: &str,
    b: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let key = pair_key(a, b);

    let inserted = sqlx::query(
        r#"
        INSERT INTO friendships (id, pair_key, user_a, user_b, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(pair_key) DO NOTHING
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&key)
    .bind(a)
    .bind(b)
    .bind(to_millis(at))
    .execute(&mut **tx)
    .await?
    .rows_affected()
        == 1;

    sqlx::query(
        r#"
        DELETE FROM friendship_hidden
        WHERE friendship_id = (SELECT id FROM friendships WHERE pair_key = ?)
        "#,
    )
    .bind(&key)
    .execute(&mut **tx)
    .await?;

    Ok(inserted)
}
