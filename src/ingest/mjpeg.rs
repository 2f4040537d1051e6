//! HTTP MJPEG / JPEG snapshot source.
//!
//! `multipart/*` responses are treated as an MJPEG stream and split on JPEG
//! SOI/EOI markers. Any other content type is treated as a snapshot endpoint
//! and re-fetched on every read.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use url::Url;

use super::{FrameRead, FrameSource};
use crate::error::HeatmapError;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 8192;

pub struct MjpegSource {
    url: String,
    stream: Option<HttpStream>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegSource {
    /// Open the stream. Fails with `SourceUnavailable` if the endpoint does
    /// not answer.
    pub fn connect(url: &str) -> Result<Self> {
        Url::parse(url).map_err(|e| HeatmapError::source_unavailable(url, e))?;
        let response = ureq::get(url)
            .call()
            .map_err(|e| HeatmapError::source_unavailable(url, e))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let stream = if content_type.contains("multipart") {
            HttpStream::Mjpeg(MjpegStream::new(response.into_reader()))
        } else {
            HttpStream::SingleJpeg
        };
        log::info!(
            "MjpegSource: connected to {} ({})",
            url,
            if content_type.contains("multipart") {
                "mjpeg"
            } else {
                "snapshot"
            }
        );
        Ok(Self {
            url: url.to_string(),
            stream: Some(stream),
        })
    }
}

impl FrameSource for MjpegSource {
    fn location(&self) -> &str {
        &self.url
    }

    fn read_frame(&mut self) -> Result<FrameRead> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("mjpeg source {} already released", self.url))?;
        let jpeg = match stream {
            HttpStream::Mjpeg(stream) => match stream.read_next_jpeg()? {
                Some(bytes) => bytes,
                None => return Ok(FrameRead::Exhausted),
            },
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.url)?,
        };
        let image = image::load_from_memory(&jpeg)
            .context("decode jpeg")?
            .into_rgb8();
        Ok(FrameRead::Image(image))
    }

    fn release(&mut self) {
        // Dropping the reader closes the HTTP connection.
        self.stream = None;
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, or `None` when the server closed the stream.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
                return Err(anyhow!("mjpeg frame exceeded {} bytes", MAX_JPEG_BYTES));
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Byte range `[start, end)` of the first complete JPEG in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
