use image::DynamicImage;

use crate::error::{Result, ThumbnailError};
use crate::source::MediaSource;

/// How precisely the sampler honours the requested timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekPolicy {
    /// Return the first frame from the sync sample at or before the target.
    /// One GOP of error at most, but decode cost is bounded.
    #[default]
    ClosestSync,
    /// Decode forward from the preceding sync sample up to the target.
    Exact,
}

/// A decoded picture owned by a single request.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    image: DynamicImage,
    pts_us: Option<i64>,
}

impl DecodedFrame {
    pub fn new(image: DynamicImage) -> Self {
        Self { image, pts_us: None }
    }

    /// Attach the presentation time (microseconds) the frame was decoded at.
    pub fn with_pts(mut self, pts_us: i64) -> Self {
        self.pts_us = Some(pts_us);
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pts_us(&self) -> Option<i64> {
        self.pts_us
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

/// An open, decodable media handle. Dropping it releases the underlying
/// decoder resources.
pub trait MediaHandle {
    /// Decode one frame at or before `time_us`.
    fn frame_at(&mut self, time_us: i64, policy: SeekPolicy) -> Result<DecodedFrame>;

    /// Media duration in microseconds, if the container reports one.
    fn duration_us(&self) -> Option<i64> {
        None
    }
}

/// Platform decoder capability: opens sources into [`MediaHandle`]s.
pub trait Decoder: Send + Sync {
    type Handle: MediaHandle;

    /// Open `source`. Failures map to [`ThumbnailError::SourceUnavailable`].
    fn open(&self, source: &MediaSource) -> Result<Self::Handle>;
}

impl<D: Decoder + ?Sized> Decoder for std::sync::Arc<D> {
    type Handle = D::Handle;

    fn open(&self, source: &MediaSource) -> Result<Self::Handle> {
        (**self).open(source)
    }
}

/// Sample one frame from `handle` at `time_us`.
///
/// Rejects timestamps past the reported duration before asking the decoder,
/// since seeking there would otherwise land on the last sync sample.
pub fn sample_frame<H: MediaHandle + ?Sized>(
    handle: &mut H,
    time_us: i64,
    policy: SeekPolicy,
) -> Result<DecodedFrame> {
    let time_us = time_us.max(0);

    if let Some(duration) = handle.duration_us().filter(|d| *d > 0) {
        if time_us > duration {
            return Err(ThumbnailError::FrameExtractionFailed(format!(
                "requested time {} ms is beyond media duration {} ms",
                time_us / 1000,
                duration / 1000
            )));
        }
    }

    let frame = handle.frame_at(time_us, policy)?;
    if frame.width() == 0 || frame.height() == 0 {
        return Err(ThumbnailError::FrameExtractionFailed(
            "decoder returned an empty frame".to_string(),
        ));
    }

    log::debug!(
        "Sampled {}x{} frame at {:?} us (requested {} us, {:?})",
        frame.width(),
        frame.height(),
        frame.pts_us(),
        time_us,
        policy
    );
    Ok(frame)
}
