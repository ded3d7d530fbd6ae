use crate::db::models::{Event, EventRow, NewEvent};
use crate::error::Error;
use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Events repository for handling event operations
#[derive(Clone)]
pub struct EventsRepository {
    pool: Arc<SqlitePool>,
}

impl EventsRepository {
    /// Create a new events repository
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Append an event and return the id assigned to it
    pub async fn create(&self, event: &NewEvent) -> Result<i64> {
        let bbox = serde_json::to_string(&event.bbox)
            .map_err(|e| Error::Database(format!("Failed to encode bbox: {}", e)))?;
        let meta = serde_json::to_string(&event.meta)
            .map_err(|e| Error::Database(format!("Failed to encode meta: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO events (event_type, confidence, bbox, timestamp, source, meta)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.event_type)
        .bind(event.confidence)
        .bind(bbox)
        .bind(event.timestamp)
        .bind(&event.source)
        .bind(meta)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create event: {}", e)))?;

        Ok(result.last_insert_rowid())
    }

    /// Most recently inserted events, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, event_type, confidence, bbox, timestamp, source, meta
            FROM events
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get recent events: {}", e)))?;

        let events = rows
            .into_iter()
            .map(Event::try_from)
            .collect::<std::result::Result<Vec<_>, Error>>()?;

        Ok(events)
    }
}
