use std::str::FromStr;

use crate::api::{EventCreateRequest, EventResponse, EventStatus, EventUpdateRequest, RowId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, Row, SqlitePool};

#[async_trait]
pub trait EventDB {
    async fn create_event(&self, event: EventCreateRequest) -> Result<EventResponse>;
    async fn get_events(&self, offset: i64, limit: i64) -> Result<Vec<EventResponse>>;
    /// Partial update. Returns the pre-update status together with the
    /// updated event, or None if the event doesn't exist. A terminal status
    /// in the update forces the deadline to now, closing the event to new
    /// bets.
    async fn update_event(
        &self,
        event: RowId,
        update: EventUpdateRequest,
    ) -> Result<Option<(EventStatus, EventResponse)>>;
    async fn get_available_events(&self) -> Result<Vec<EventResponse>>;
    async fn get_available_event_detail(&self, event: RowId) -> Result<Option<EventResponse>>;
}

pub struct SQLite {
    connection: SqlitePool,
}
impl SQLite {
    pub async fn new(db_conn: Option<String>) -> Self {
        // A fresh connection to sqlite::memory: is a fresh database, so the
        // pool is pinned to one connection that never gets reaped.
        let connection = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(
                db_conn
                    .unwrap_or_else(|| "sqlite::memory:".to_string())
                    .as_str(),
            )
            .await
            .unwrap();
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS events (\
            id INTEGER PRIMARY KEY,\
            name TEXT NOT NULL,\
            description TEXT,\
            coef_1st_team_win TEXT NOT NULL,\
            coef_2nd_team_win TEXT NOT NULL,\
            timestamp INTEGER NOT NULL,\
            deadline INTEGER NOT NULL,\
            status TEXT NOT NULL DEFAULT 'NOT_FINISHED'\
            )",
            )
            .await
            .unwrap();
        Self { connection }
    }
    async fn get_event(&self, event: RowId) -> Result<Option<EventResponse>> {
        let row = self
            .connection
            .fetch_optional(query("SELECT * FROM events WHERE id = ?").bind(event))
            .await
            .with_context(|| format!("couldn't get event {}", event))?;
        row.as_ref().map(event_from_row).transpose()
    }
}
fn datetime_from_row(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(row.get(column), 0)
        .single()
        .with_context(|| format!("invalid {} timestamp in events row", column))
}
fn event_from_row(row: &SqliteRow) -> Result<EventResponse> {
    Ok(EventResponse {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        coef_1st_team_win: Decimal::from_str(row.get("coef_1st_team_win"))?,
        coef_2nd_team_win: Decimal::from_str(row.get("coef_2nd_team_win"))?,
        timestamp: datetime_from_row(row, "timestamp")?,
        deadline: datetime_from_row(row, "deadline")?,
        status: EventStatus::from_str(row.get("status"))?,
    })
}
#[async_trait]
impl EventDB for SQLite {
    async fn create_event(&self, event: EventCreateRequest) -> Result<EventResponse> {
        let id = self
            .connection
            .execute(
                query(
                    "INSERT INTO events (\
            name,\
            description,\
            coef_1st_team_win,\
            coef_2nd_team_win,\
            timestamp,\
            deadline,\
            status)\
            VALUES (?,?,?,?,?,?,?)",
                )
                .bind(event.name)
                .bind(event.description)
                .bind(event.coef_1st_team_win.to_string())
                .bind(event.coef_2nd_team_win.to_string())
                .bind(Utc::now().timestamp())
                .bind(event.deadline.timestamp())
                .bind(event.status.to_string()),
            )
            .await?
            .last_insert_rowid();
        self.get_event(id)
            .await?
            .context("event disappeared right after creation")
    }
    async fn get_events(&self, offset: i64, limit: i64) -> Result<Vec<EventResponse>> {
        let rows = self
            .connection
            .fetch_all(
                query("SELECT * FROM events ORDER BY id LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset),
            )
            .await?;
        rows.iter().map(event_from_row).collect()
    }
    async fn update_event(
        &self,
        event: RowId,
        update: EventUpdateRequest,
    ) -> Result<Option<(EventStatus, EventResponse)>> {
        let Some(existing) = self.get_event(event).await? else {
            return Ok(None);
        };
        let old_status = existing.status;
        let status = update.status.unwrap_or(old_status);
        let mut deadline = update.deadline.unwrap_or(existing.deadline);
        if update.status.is_some() && status.is_terminal() {
            deadline = Utc::now();
        }
        self.connection
            .execute(
                query(
                    "UPDATE events \
                SET name = ?,\
                description = ?,\
                coef_1st_team_win = ?,\
                coef_2nd_team_win = ?,\
                deadline = ?,\
                status = ? \
                WHERE id = ?",
                )
                .bind(update.name.unwrap_or(existing.name))
                .bind(update.description.or(existing.description))
                .bind(
                    update
                        .coef_1st_team_win
                        .unwrap_or(existing.coef_1st_team_win)
                        .to_string(),
                )
                .bind(
                    update
                        .coef_2nd_team_win
                        .unwrap_or(existing.coef_2nd_team_win)
                        .to_string(),
                )
                .bind(deadline.timestamp())
                .bind(status.to_string())
                .bind(event),
            )
            .await?;
        let updated = self
            .get_event(event)
            .await?
            .context("event disappeared during update")?;
        Ok(Some((old_status, updated)))
    }
    async fn get_available_events(&self) -> Result<Vec<EventResponse>> {
        let rows = self
            .connection
            .fetch_all(
                query("SELECT * FROM events WHERE deadline > ? ORDER BY id")
                    .bind(Utc::now().timestamp()),
            )
            .await?;
        rows.iter().map(event_from_row).collect()
    }
    async fn get_available_event_detail(&self, event: RowId) -> Result<Option<EventResponse>> {
        let row = self
            .connection
            .fetch_optional(
                query("SELECT * FROM events WHERE id = ? AND deadline > ?")
                    .bind(event)
                    .bind(Utc::now().timestamp()),
            )
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn create_request(name: &str, deadline: DateTime<Utc>) -> EventCreateRequest {
        EventCreateRequest {
            name: name.to_string(),
            description: Some("derby".to_string()),
            coef_1st_team_win: dec!(1.80),
            coef_2nd_team_win: dec!(2.10),
            deadline,
            status: EventStatus::NotFinished,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_event() {
        let db = SQLite::new(None).await;
        let deadline = Utc::now() + Duration::hours(1);
        let event = db
            .create_event(create_request("final", deadline))
            .await
            .unwrap();
        assert_eq!(event.name, "final");
        assert_eq!(event.description, Some("derby".to_string()));
        assert_eq!(event.coef_1st_team_win, dec!(1.80));
        assert_eq!(event.coef_2nd_team_win, dec!(2.10));
        assert_eq!(event.deadline.timestamp(), deadline.timestamp());
        assert_eq!(event.status, EventStatus::NotFinished);
        assert!(event.timestamp <= Utc::now());
    }

    #[tokio::test]
    async fn available_excludes_past_deadlines() {
        let db = SQLite::new(None).await;
        let past = db
            .create_event(create_request("finished", Utc::now() - Duration::hours(1)))
            .await
            .unwrap();
        let upcoming = db
            .create_event(create_request("upcoming", Utc::now() + Duration::hours(1)))
            .await
            .unwrap();

        let available = db.get_available_events().await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, upcoming.id);

        assert!(db
            .get_available_event_detail(past.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            db.get_available_event_detail(upcoming.id)
                .await
                .unwrap()
                .unwrap()
                .id,
            upcoming.id
        );
        assert!(db.get_available_event_detail(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_update_keeps_unset_fields() {
        let db = SQLite::new(None).await;
        let event = db
            .create_event(create_request("final", Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        let (old_status, updated) = db
            .update_event(
                event.id,
                EventUpdateRequest {
                    coef_1st_team_win: Some(dec!(1.95)),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old_status, EventStatus::NotFinished);
        assert_eq!(updated.coef_1st_team_win, dec!(1.95));
        assert_eq!(updated.coef_2nd_team_win, dec!(2.10));
        assert_eq!(updated.name, "final");
        assert_eq!(updated.status, EventStatus::NotFinished);
    }

    #[tokio::test]
    async fn terminal_status_forces_deadline_to_now() {
        let db = SQLite::new(None).await;
        let event = db
            .create_event(create_request("final", Utc::now() + Duration::hours(1)))
            .await
            .unwrap();
        let (old_status, updated) = db
            .update_event(
                event.id,
                EventUpdateRequest {
                    status: Some(EventStatus::FirstTeamWon),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old_status, EventStatus::NotFinished);
        assert_eq!(updated.status, EventStatus::FirstTeamWon);
        assert!(updated.deadline <= Utc::now());
        assert!(db
            .get_available_event_detail(event.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn updating_missing_event_returns_none() {
        let db = SQLite::new(None).await;
        let result = db
            .update_event(42, EventUpdateRequest::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
