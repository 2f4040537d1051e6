//! Synthetic frame source (`stub://`).
//!
//! Produces a deterministic street-like scene so the whole pipeline can run
//! without a camera. Query parameters:
//! - `frames=N`: stop after N frames (default: unbounded)
//! - `size=WxH`: frame size (default 640x480)

use anyhow::Result;
use image::{Rgb, RgbImage};

use super::{FrameRead, FrameSource};
use crate::error::HeatmapError;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

pub struct SyntheticSource {
    location: String,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    frame_count: u64,
    released: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, frame_limit: Option<u64>) -> Self {
        Self {
            location: format!("stub://synthetic?size={}x{}", width, height),
            width,
            height,
            frame_limit,
            frame_count: 0,
            released: false,
        }
    }

    /// Parse a `stub://` location.
    pub fn from_location(location: &str) -> Result<Self> {
        let rest = location
            .strip_prefix("stub://")
            .ok_or_else(|| HeatmapError::source_unavailable(location, "not a stub:// location"))?;
        let mut source = Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT, None);
        source.location = location.to_string();

        let query = rest.split_once('?').map(|(_, q)| q).unwrap_or("");
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "frames" => {
                    let n: u64 = value.parse().map_err(|_| {
                        HeatmapError::source_unavailable(location, format!("bad frames '{}'", value))
                    })?;
                    source.frame_limit = Some(n);
                }
                "size" => {
                    let (w, h) = parse_size(value).ok_or_else(|| {
                        HeatmapError::source_unavailable(location, format!("bad size '{}'", value))
                    })?;
                    source.width = w;
                    source.height = h;
                }
                other => log::warn!("SyntheticSource: ignoring unknown parameter '{}'", other),
            }
        }
        log::info!(
            "SyntheticSource: opened {} ({}x{}, limit={:?})",
            source.location,
            source.width,
            source.height,
            source.frame_limit
        );
        Ok(source)
    }

    /// Road in the lower half, sky above, and a bright block that drifts
    /// across the lane so consecutive frames differ.
    fn render_scene(&self) -> RgbImage {
        let horizon = self.height / 2;
        let block_w = (self.width / 10).max(1);
        let block_x = ((self.frame_count * 7) % self.width as u64) as u32;
        let lane_top = self.height * 5 / 8;
        let lane_bottom = (lane_top + self.height / 8).min(self.height);

        RgbImage::from_fn(self.width, self.height, |x, y| {
            if y < horizon {
                let shade = 150 + (y * 80 / horizon.max(1)) as u8;
                Rgb([shade / 2, shade / 2 + 20, shade])
            } else if y >= lane_top && y < lane_bottom && x >= block_x && x < block_x + block_w {
                Rgb([220, 40, 40])
            } else {
                let stripe = if (x / 16 + y / 16) % 2 == 0 { 70 } else { 80 };
                Rgb([stripe, stripe, stripe])
            }
        })
    }
}

impl FrameSource for SyntheticSource {
    fn location(&self) -> &str {
        &self.location
    }

    fn read_frame(&mut self) -> Result<FrameRead> {
        if self.released {
            return Err(HeatmapError::source_unavailable(&self.location, "source released").into());
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(FrameRead::Exhausted);
        }
        self.frame_count += 1;
        Ok(FrameRead::Image(self.render_scene()))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once('x')?;
    let w: u32 = w.parse().ok()?;
    let h: u32 = h.parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}
