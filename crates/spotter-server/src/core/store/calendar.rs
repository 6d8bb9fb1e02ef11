//! Calendar events, read by the compatibility engine

use super::{from_millis, to_millis, Store};
use crate::core::error::Result;
use crate::core::models::CalendarEvent;
use chrono::{DateTime, Utc};

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    owner_id: String,
    title: String,
    start_at: i64,
    end_at: i64,
    shared: bool,
}

impl From<EventRow> for CalendarEvent {
    fn from(row: EventRow) -> Self {
        CalendarEvent {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            start: from_millis(row.start_at),
            end: from_millis(row.end_at),
            shared: row.shared,
        }
    }
}

impl Store {
    pub async fn insert_event(&self, event: &CalendarEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO calendar_events (id, owner_id, title, start_at, end_at, shared)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.owner_id)
        .bind(&event.title)
        .bind(to_millis(event.start))
        .bind(to_millis(event.end))
        .bind(event.shared)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// All of the owner's events starting at or after `from`
    pub async fn future_events(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, title, start_at, end_at, shared
            FROM calendar_events
            WHERE owner_id = ? AND start_at >= ?
            ORDER BY start_at, id
            "#,
        )
        .bind(owner_id)
        .bind(to_millis(from))
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(CalendarEvent::from).collect())
    }

    /// Shared events of everyone but `exclude_owner` whose start falls in
    /// `[from, until]`. End times are not filtered.
    pub async fn shared_events_starting_between(
        &self,
        exclude_owner: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, title, start_at, end_at, shared
            FROM calendar_events
            WHERE owner_id != ? AND shared = 1 AND start_at >= ? AND start_at <= ?
            ORDER BY owner_id, start_at, id
            "#,
        )
        .bind(exclude_owner)
        .bind(to_millis(from))
        .bind(to_millis(until))
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(CalendarEvent::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_support::temp_store;
    use chrono::Duration;

    #[tokio::test]
    async fn shared_window_filters_on_start_only() {
        let (_dir, store) = temp_store().await;
        let now = Utc::now();
        let events = [
            // long-running but starts inside the window
            CalendarEvent::new(
                "b",
                "marathon block",
                now + Duration::days(1),
                now + Duration::days(40),
                true,
            ),
            CalendarEvent::new(
                "b",
                "private",
                now + Duration::hours(2),
                now + Duration::hours(3),
                false,
            ),
            CalendarEvent::new(
                "b",
                "too far",
                now + Duration::days(20),
                now + Duration::days(21),
                true,
            ),
            CalendarEvent::new(
                "b",
                "past",
                now - Duration::days(1),
                now - Duration::hours(23),
                true,
            ),
            CalendarEvent::new(
                "a",
                "mine",
                now + Duration::hours(1),
                now + Duration::hours(2),
                true,
            ),
        ];
        for event in &events {
            store.insert_event(event).await.unwrap();
        }

        let shared = store
            .shared_events_starting_between("a", now, now + Duration::days(14))
            .await
            .unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].title, "marathon block");

        let mine = store.future_events("b", now).await.unwrap();
        assert_eq!(mine.len(), 3);
    }
}
