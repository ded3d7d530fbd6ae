use crate::config::EventsConfig;
use crate::db::models::{Event, NewEvent};
use crate::db::repositories::EventsRepository;
use crate::error::Error;
use crate::messaging::AlertNotifier;
use crate::services::frame_buffer::FrameBuffer;
use anyhow::Result;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Standard alphabet, padding optional on input
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Body of `POST /event`
#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    pub confidence: f64,
    pub bbox: Vec<Value>,
    #[serde(default)]
    pub frame_id: Option<i64>,
    /// May be omitted, but not null
    #[serde(default, deserialize_with = "present")]
    pub source: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(Some)
}

/// Body of `POST /frame`
#[derive(Debug, Clone, Deserialize)]
pub struct FramePayload {
    /// Base64 encoded JPEG (a `data:` URL prefix is tolerated)
    pub image: String,
}

/// Validates detector input and routes it to the event store, the frame
/// buffer and the alert notifier. Holds no state of its own.
#[derive(Clone)]
pub struct EventGateway {
    events: EventsRepository,
    frames: FrameBuffer,
    notifier: Arc<dyn AlertNotifier>,
    config: EventsConfig,
}

impl EventGateway {
    pub fn new(
        events: EventsRepository,
        frames: FrameBuffer,
        notifier: Arc<dyn AlertNotifier>,
        config: &EventsConfig,
    ) -> Self {
        Self {
            events,
            frames,
            notifier,
            config: config.clone(),
        }
    }

    /// Persist a detection event and dispatch its alert. Returns the event id.
    ///
    /// The alert is sent on a separate task; its outcome is only logged and
    /// never affects the stored event.
    pub async fn ingest_event(&self, payload: EventPayload) -> Result<i64> {
        let source = payload
            .source
            .unwrap_or_else(|| self.config.default_source.clone());

        let event = NewEvent {
            event_type: payload.event_type,
            confidence: payload.confidence,
            bbox: Value::Array(payload.bbox),
            timestamp: chrono::Utc::now().timestamp(),
            source,
            meta: Value::Object(payload.meta),
        };

        let id = self.events.create(&event).await?;
        info!(
            "Stored event {} ({} from {}, confidence {:.2})",
            id, event.event_type, event.source, event.confidence
        );
        if let Some(frame_id) = payload.frame_id {
            debug!("Event {} refers to detector frame {}", id, frame_id);
        }

        let message = alert_message(&event.source, &event.event_type);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&message).await {
                warn!("Alert for event {} was not delivered: {}", id, e);
            }
        });

        Ok(id)
    }

    /// Decode a base64 image and make it the current frame
    pub async fn ingest_frame(&self, payload: FramePayload) -> Result<()> {
        let bytes = decode_base64(&payload.image)?;
        let frame = self.frames.publish(bytes).await?;
        debug!(
            "Frame {} accepted ({}x{})",
            frame.sequence(),
            frame.width(),
            frame.height()
        );
        Ok(())
    }

    /// Newest events first; `None` uses the configured default limit
    pub async fn list_recent(&self, limit: Option<i64>) -> Result<Vec<Event>> {
        let limit = self.resolve_limit(limit)?;
        self.events.recent(limit).await
    }

    fn resolve_limit(&self, limit: Option<i64>) -> Result<i64, Error> {
        match limit {
            None => Ok(self.config.default_limit),
            Some(n) if n < 0 => Err(Error::Validation(format!(
                "limit must not be negative (got {})",
                n
            ))),
            Some(n) => Ok(n.min(self.config.max_limit)),
        }
    }
}

pub fn alert_message(source: &str, event_type: &str) -> String {
    format!("[{}] {} detected.", source, event_type)
}

fn decode_base64(image: &str) -> Result<Vec<u8>, Error> {
    let encoded = match image.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => image,
    };
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    BASE64
        .decode(compact.as_bytes())
        .map_err(|e| Error::Decode(format!("Invalid base64 image: {}", e)))
}
