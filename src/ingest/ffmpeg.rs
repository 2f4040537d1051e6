//! Video file / network stream source using FFmpeg.
//!
//! Anything FFmpeg can open (local files, RTSP, HTTP streams) is decoded
//! in-memory and scaled to RGB24 at the native resolution.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::{FrameRead, FrameSource};
use crate::error::HeatmapError;

pub struct FfmpegSource {
    location: String,
    input: Option<ffmpeg::format::context::Input>,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    end_of_input: bool,
}

impl FfmpegSource {
    /// Open `location`. Fails with `SourceUnavailable` when FFmpeg cannot open
    /// it or it has no video track.
    pub fn open(location: &str) -> Result<Self> {
        Self::open_inner(location)
            .map_err(|e| HeatmapError::source_unavailable(location, format!("{:#}", e)).into())
    }

    fn open_inner(location: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&location)
            .with_context(|| format!("failed to open '{}' with ffmpeg", location))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("input has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegSource: opened {} ({}x{})",
            location,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            location: location.to_string(),
            input: Some(input),
            stream_index,
            decoder,
            scaler,
            end_of_input: false,
        })
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        frame_to_image(&rgb_frame)
    }
}

impl FrameSource for FfmpegSource {
    fn location(&self) -> &str {
        &self.location
    }

    fn read_frame(&mut self) -> Result<FrameRead> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return Ok(FrameRead::Image(self.convert(&decoded)?));
        }
        if self.end_of_input {
            return Ok(FrameRead::Exhausted);
        }

        let input = self
            .input
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg source {} already released", self.location))?;
        let mut got_frame = false;
        for (stream, packet) in input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                got_frame = true;
                break;
            }
        }
        if got_frame {
            return Ok(FrameRead::Image(self.convert(&decoded)?));
        }

        // Demuxer ran dry: flush what the decoder still holds.
        self.end_of_input = true;
        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return Ok(FrameRead::Image(self.convert(&decoded)?));
        }
        Ok(FrameRead::Exhausted)
    }

    fn release(&mut self) {
        self.input = None;
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        pixels
    };

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("ffmpeg frame does not match {}x{}", width, height))
}
