use crate::config::StreamingConfig;
use crate::services::frame_buffer::{Frame, FrameBuffer};
use axum::body::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, warn};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Multipart boundary announced in the `/video` content type
pub const BOUNDARY: &str = "frame";

/// Content type of the live video response
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG image as a `multipart/x-mixed-replace` part
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    Bytes::from(chunk)
}

/// Turns the frame buffer into per-viewer multipart streams
#[derive(Clone)]
pub struct StreamPublisher {
    frames: FrameBuffer,
    resend_interval: Option<Duration>,
    shutdown: CancellationToken,
}

struct ViewerState {
    receiver: watch::Receiver<Option<Arc<Frame>>>,
    last_sequence: Option<u64>,
    resend_due: bool,
    resend_interval: Option<Duration>,
    shutdown: CancellationToken,
}

enum Wait {
    Changed,
    ResendDue,
    Closed,
}

impl StreamPublisher {
    pub fn new(frames: FrameBuffer, config: &StreamingConfig) -> Self {
        let resend_interval = match config.resend_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        Self {
            frames,
            resend_interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// End every open viewer stream and refuse new ones
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Open an endless stream of multipart chunks for one viewer.
    ///
    /// Nothing is emitted until a frame exists. After that the viewer gets
    /// one chunk per published frame, plus a repeat of the current frame
    /// whenever the resend interval passes without a new one. Dropping the
    /// stream releases the subscription.
    pub fn subscribe(&self) -> BoxStream<'static, Result<Bytes, Infallible>> {
        let state = ViewerState {
            receiver: self.frames.subscribe(),
            last_sequence: None,
            resend_due: false,
            resend_interval: self.resend_interval,
            shutdown: self.shutdown.clone(),
        };

        stream::unfold(state, |mut state| async move {
            let chunk = next_chunk(&mut state).await?;
            Some((Ok(chunk), state))
        })
        .boxed()
    }
}

async fn next_chunk(state: &mut ViewerState) -> Option<Bytes> {
    loop {
        if state.shutdown.is_cancelled() {
            return None;
        }

        let current = state.receiver.borrow_and_update().clone();

        if let Some(frame) = current {
            let is_new = state.last_sequence != Some(frame.sequence());
            if is_new || state.resend_due {
                state.resend_due = false;
                state.last_sequence = Some(frame.sequence());
                if let Some(jpeg) = encode(frame).await {
                    return Some(multipart_chunk(&jpeg));
                }
            }
        }

        // resend only once something has been sent
        let resend_after = state.resend_interval.filter(|_| state.last_sequence.is_some());
        let outcome = tokio::select! {
            _ = state.shutdown.cancelled() => Wait::Closed,
            outcome = wait_for_frame(&mut state.receiver, resend_after) => outcome,
        };

        match outcome {
            Wait::Changed => {}
            Wait::ResendDue => state.resend_due = true,
            Wait::Closed => {
                debug!("Video stream closed");
                return None;
            }
        }
    }
}

async fn wait_for_frame(
    receiver: &mut watch::Receiver<Option<Arc<Frame>>>,
    resend_after: Option<Duration>,
) -> Wait {
    let changed = match resend_after {
        Some(interval) => match tokio::time::timeout(interval, receiver.changed()).await {
            Ok(changed) => changed,
            Err(_) => return Wait::ResendDue,
        },
        None => receiver.changed().await,
    };

    match changed {
        Ok(()) => Wait::Changed,
        Err(_) => Wait::Closed,
    }
}

async fn encode(frame: Arc<Frame>) -> Option<Bytes> {
    let sequence = frame.sequence();
    match tokio::task::spawn_blocking(move || frame.to_jpeg()).await {
        Ok(Ok(jpeg)) => Some(jpeg),
        Ok(Err(e)) => {
            warn!("Skipping frame {}: {}", sequence, e);
            None
        }
        Err(e) => {
            warn!("Encode task for frame {} failed: {}", sequence, e);
            None
        }
    }
}
