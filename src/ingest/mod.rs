//! Frame ingestion sources.
//!
//! This module provides different sources for sampled frames:
//! - Synthetic scenes (`stub://`), for dry runs and tests
//! - HTTP MJPEG / JPEG snapshot streams (feature: ingest-mjpeg)
//! - Local video files and network streams via FFmpeg (feature: ingest-ffmpeg)
//!
//! Sources only know how to read one image at a time. Pacing, transient-error
//! skipping and release-exactly-once are handled by `FrameSampler`, so every
//! backend gets the same sequence semantics.

#[cfg(feature = "ingest-ffmpeg")]
mod ffmpeg;
#[cfg(feature = "ingest-mjpeg")]
mod mjpeg;
mod sampler;
mod synthetic;

#[cfg(feature = "ingest-ffmpeg")]
pub use ffmpeg::FfmpegSource;
#[cfg(feature = "ingest-mjpeg")]
pub use mjpeg::MjpegSource;
pub use sampler::{FrameSampler, SamplerStats};
pub use synthetic::SyntheticSource;

use anyhow::Result;
use image::RgbImage;

use crate::error::HeatmapError;

/// Outcome of a single read.
pub enum FrameRead {
    Image(RgbImage),
    /// A finite source has no more frames.
    Exhausted,
}

/// Anything that can deliver images and be released.
///
/// `read_frame` returning `Err` means this one read failed; the caller may try
/// again. `release` frees the underlying handle; `FrameSampler` guarantees it
/// is called exactly once.
pub trait FrameSource {
    /// Location string this source was opened from (for logs).
    fn location(&self) -> &str;

    fn read_frame(&mut self) -> Result<FrameRead>;

    fn release(&mut self);
}

/// Open a frame source for `location`.
///
/// - `stub://name[?frames=N&size=WxH]`: synthetic scene
/// - `http(s)://...`: MJPEG or JPEG snapshots (ingest-mjpeg)
/// - anything else: file path or stream URL decoded by FFmpeg (ingest-ffmpeg)
///
/// Fails with `SourceUnavailable` when the location cannot be opened.
pub fn open_source(location: &str) -> Result<Box<dyn FrameSource>> {
    if location.trim().is_empty() {
        return Err(HeatmapError::source_unavailable(location, "empty location").into());
    }
    if location.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::from_location(location)?));
    }
    if location.starts_with("http://") || location.starts_with("https://") {
        return open_http(location);
    }
    open_ffmpeg(location)
}

#[cfg(feature = "ingest-mjpeg")]
fn open_http(location: &str) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(MjpegSource::connect(location)?))
}

#[cfg(not(feature = "ingest-mjpeg"))]
fn open_http(location: &str) -> Result<Box<dyn FrameSource>> {
    #[cfg(feature = "ingest-ffmpeg")]
    {
        open_ffmpeg(location)
    }
    #[cfg(not(feature = "ingest-ffmpeg"))]
    {
        Err(HeatmapError::source_unavailable(
            location,
            "HTTP streams require the ingest-mjpeg or ingest-ffmpeg feature",
        )
        .into())
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_ffmpeg(location: &str) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(FfmpegSource::open(location)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_ffmpeg(location: &str) -> Result<Box<dyn FrameSource>> {
    Err(HeatmapError::source_unavailable(
        location,
        "video files and stream URLs require the ingest-ffmpeg feature",
    )
    .into())
}
