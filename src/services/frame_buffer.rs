use crate::error::Error;
use anyhow::Result;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use log::debug;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// A fully decoded camera image. Never mutated after publication.
pub struct Frame {
    sequence: u64,
    received_at: DateTime<Utc>,
    image: RgbImage,
    jpeg_quality: u8,
    jpeg: OnceCell<Bytes>,
}

impl Frame {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// JPEG encoding of the frame, computed once and shared by every viewer.
    /// CPU bound; call from a blocking context.
    pub fn to_jpeg(&self) -> Result<Bytes> {
        let bytes = self.jpeg.get_or_try_init(|| {
            let mut buf = Vec::new();
            JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality)
                .encode_image(&self.image)
                .map_err(|e| Error::Internal(format!("Failed to encode frame: {}", e)))?;
            Ok::<_, Error>(Bytes::from(buf))
        })?;

        Ok(bytes.clone())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("received_at", &self.received_at)
            .finish()
    }
}

struct Inner {
    sender: watch::Sender<Option<Arc<Frame>>>,
    next_sequence: AtomicU64,
    jpeg_quality: u8,
}

/// Single-slot holder for the most recent frame.
///
/// Publishing swaps an `Arc<Frame>` inside a watch channel, so readers see
/// either the previous frame or the new one, and every subscriber is woken
/// without consuming the frame. Decoding happens before the swap, outside
/// the channel lock.
#[derive(Clone)]
pub struct FrameBuffer {
    inner: Arc<Inner>,
}

impl FrameBuffer {
    pub fn new(jpeg_quality: u8) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                sender,
                next_sequence: AtomicU64::new(1),
                jpeg_quality: jpeg_quality.clamp(1, 100),
            }),
        }
    }

    /// Decode `image_bytes` and make the result the current frame.
    /// On a decode failure the current frame is left untouched.
    pub async fn publish(&self, image_bytes: Vec<u8>) -> Result<Arc<Frame>> {
        let image = tokio::task::spawn_blocking(move || decode_image(&image_bytes))
            .await
            .map_err(|e| Error::Internal(format!("Frame decode task failed: {}", e)))??;

        let frame = Arc::new(Frame {
            sequence: self.inner.next_sequence.fetch_add(1, Ordering::SeqCst),
            received_at: Utc::now(),
            image,
            jpeg_quality: self.inner.jpeg_quality,
            jpeg: OnceCell::new(),
        });

        debug!(
            "Publishing frame {} ({}x{})",
            frame.sequence,
            frame.width(),
            frame.height()
        );
        self.inner.sender.send_replace(Some(frame.clone()));

        Ok(frame)
    }

    /// The current frame, or `None` if nothing has been published yet
    pub fn current(&self) -> Option<Arc<Frame>> {
        self.inner.sender.borrow().clone()
    }

    /// Receiver notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.inner.sender.subscribe()
    }

    /// Number of live subscriptions (connected viewers)
    pub fn viewer_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

fn decode_image(bytes: &[u8]) -> Result<RgbImage, Error> {
    if bytes.is_empty() {
        return Err(Error::Decode("Image payload is empty".to_string()));
    }

    let image = image::load_from_memory(bytes)
        .map_err(|e| Error::Decode(format!("Invalid image data: {}", e)))?;

    Ok(image.to_rgb8())
}
