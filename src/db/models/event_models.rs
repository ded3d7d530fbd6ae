use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Detection event as stored and returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub event_type: String,
    pub confidence: f64,
    pub bbox: Value,
    /// Unix seconds, assigned at receipt
    pub timestamp: i64,
    pub source: String,
    pub meta: Value,
}

/// Event fields supplied on insert; the id is assigned by the store
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub confidence: f64,
    pub bbox: Value,
    pub timestamp: i64,
    pub source: String,
    pub meta: Value,
}

/// Raw row; `bbox` and `meta` are kept as JSON text in the table
#[derive(Debug, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub event_type: String,
    pub confidence: f64,
    pub bbox: String,
    pub timestamp: i64,
    pub source: String,
    pub meta: String,
}

impl TryFrom<EventRow> for Event {
    type Error = Error;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let bbox = serde_json::from_str(&row.bbox).map_err(|e| {
            Error::Database(format!("Corrupt bbox for event {}: {}", row.id, e))
        })?;
        let meta = serde_json::from_str(&row.meta).map_err(|e| {
            Error::Database(format!("Corrupt meta for event {}: {}", row.id, e))
        })?;

        Ok(Self {
            id: row.id,
            event_type: row.event_type,
            confidence: row.confidence,
            bbox,
            timestamp: row.timestamp,
            source: row.source,
            meta,
        })
    }
}
