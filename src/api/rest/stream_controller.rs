use crate::api::rest::{ApiResult, AppState};
use crate::error::Error;
use crate::services::streaming::CONTENT_TYPE;
use axum::body::StreamBody;
use axum::extract::State;
use axum::http::header::{self, HeaderName};
use axum::response::IntoResponse;
use log::{debug, info};

pub const FRAME_SEQUENCE_HEADER: &str = "x-frame-sequence";
pub const FRAME_RECEIVED_HEADER: &str = "x-frame-received-at";

/// GET /video: endless multipart JPEG stream of the current frame
pub async fn video_feed(State(state): State<AppState>) -> impl IntoResponse {
    let viewer = state.publisher.subscribe();
    info!("Viewer connected, {} watching", state.frames.viewer_count());

    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        StreamBody::new(viewer),
    )
}

/// GET /frame/latest: the current frame as a single JPEG
pub async fn latest_frame(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let frame = state
        .frames
        .current()
        .ok_or_else(|| Error::NotFound("No frame has been received yet".to_string()))?;

    let sequence = frame.sequence();
    let received_at = frame.received_at().to_rfc3339();
    let jpeg = tokio::task::spawn_blocking(move || frame.to_jpeg())
        .await
        .map_err(|e| Error::Internal(format!("Encode task failed: {}", e)))??;
    debug!("Serving snapshot of frame {}", sequence);

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (HeaderName::from_static(FRAME_SEQUENCE_HEADER), sequence.to_string()),
            (HeaderName::from_static(FRAME_RECEIVED_HEADER), received_at),
        ],
        jpeg,
    ))
}
