//! Density heatmap rendering.
//!
//! A Gaussian kernel-density estimate over the detection centers is drawn as a
//! semi-transparent, colormapped overlay on a fixed background image. The
//! bandwidth follows Scott's rule per axis, scaled by `bandwidth_adjust`.
//! Density is normalised to its peak, quantised into `levels` bands, and cells
//! below `threshold` are left transparent.

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::buffer::Point;
use crate::error::HeatmapError;

/// Kernel support, in standard deviations.
const KERNEL_RADIUS_SIGMAS: f64 = 3.0;
/// Minimum bandwidth as a fraction of the shorter image side.
const MIN_BANDWIDTH_FRACTION: f64 = 0.02;

/// Color palette for the density overlay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Hot,
    Viridis,
    Inferno,
    Jet,
    Gray,
}

impl Colormap {
    fn anchors(self) -> &'static [(f32, [u8; 3])] {
        match self {
            Colormap::Hot => &[
                (0.0, [10, 0, 0]),
                (0.365, [255, 0, 0]),
                (0.746, [255, 255, 0]),
                (1.0, [255, 255, 255]),
            ],
            Colormap::Viridis => &[
                (0.0, [68, 1, 84]),
                (0.25, [59, 82, 139]),
                (0.5, [33, 145, 140]),
                (0.75, [94, 201, 98]),
                (1.0, [253, 231, 37]),
            ],
            Colormap::Inferno => &[
                (0.0, [0, 0, 4]),
                (0.25, [87, 16, 110]),
                (0.5, [188, 55, 84]),
                (0.75, [249, 142, 9]),
                (1.0, [252, 255, 164]),
            ],
            Colormap::Jet => &[
                (0.0, [0, 0, 128]),
                (0.125, [0, 0, 255]),
                (0.375, [0, 255, 255]),
                (0.625, [255, 255, 0]),
                (0.875, [255, 0, 0]),
                (1.0, [128, 0, 0]),
            ],
            Colormap::Gray => &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])],
        }
    }

    /// Color at `t` in `[0, 1]` (clamped), linearly interpolated between anchors.
    pub fn sample(self, t: f32) -> [u8; 3] {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let anchors = self.anchors();
        for pair in anchors.windows(2) {
            let (t0, c0) = pair[0];
            let (t1, c1) = pair[1];
            if t <= t1 {
                let f = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
                let mut out = [0u8; 3];
                for i in 0..3 {
                    out[i] = (c0[i] as f32 + (c1[i] as f32 - c0[i] as f32) * f).round() as u8;
                }
                return out;
            }
        }
        anchors[anchors.len() - 1].1
    }
}

impl FromStr for Colormap {
    type Err = HeatmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hot" => Ok(Colormap::Hot),
            "viridis" => Ok(Colormap::Viridis),
            "inferno" => Ok(Colormap::Inferno),
            "jet" => Ok(Colormap::Jet),
            "gray" | "grey" => Ok(Colormap::Gray),
            other => Err(HeatmapError::config(format!("unknown colormap '{}'", other))),
        }
    }
}

impl fmt::Display for Colormap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Colormap::Hot => "hot",
            Colormap::Viridis => "viridis",
            Colormap::Inferno => "inferno",
            Colormap::Jet => "jet",
            Colormap::Gray => "gray",
        };
        f.write_str(name)
    }
}

/// Overlay rendering parameters.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeatmapOptions {
    /// Overlay opacity, in (0, 1].
    pub alpha: f32,
    pub colormap: Colormap,
    /// Multiplier on the Scott's-rule bandwidth.
    pub bandwidth_adjust: f64,
    /// Number of density bands.
    pub levels: u32,
    /// Peak-normalised density below which nothing is drawn, in [0, 1).
    pub threshold: f32,
}

impl Default for HeatmapOptions {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            colormap: Colormap::Hot,
            bandwidth_adjust: 0.5,
            levels: 100,
            threshold: 0.05,
        }
    }
}

impl HeatmapOptions {
    pub fn validate(&self) -> Result<(), HeatmapError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(HeatmapError::config(format!(
                "heatmap alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        if !(self.bandwidth_adjust.is_finite() && self.bandwidth_adjust > 0.0) {
            return Err(HeatmapError::config(format!(
                "heatmap bandwidth_adjust must be positive, got {}",
                self.bandwidth_adjust
            )));
        }
        if self.levels == 0 {
            return Err(HeatmapError::config("heatmap levels must be at least 1"));
        }
        if !(self.threshold >= 0.0 && self.threshold < 1.0) {
            return Err(HeatmapError::config(format!(
                "heatmap threshold must be in [0, 1), got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Result of a render request.
#[derive(Debug)]
pub enum Emission {
    /// No points were supplied; nothing was drawn or written.
    NoOp,
    Rendered {
        image: RgbImage,
        /// Where the PNG was written, if an output path was given.
        path: Option<PathBuf>,
    },
}

impl Emission {
    pub fn is_noop(&self) -> bool {
        matches!(self, Emission::NoOp)
    }
}

/// Load the background image for overlays. Missing or unreadable files are
/// `BackgroundUnavailable`.
pub fn load_background(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).map_err(|e| HeatmapError::BackgroundUnavailable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(image.into_rgb8())
}

/// Renders density overlays on a fixed background.
pub struct HeatmapRenderer {
    background: RgbImage,
    options: HeatmapOptions,
}

impl HeatmapRenderer {
    pub fn new(background: RgbImage, options: HeatmapOptions) -> Result<Self> {
        options.validate()?;
        if background.width() == 0 || background.height() == 0 {
            return Err(HeatmapError::BackgroundUnavailable {
                path: "<memory>".into(),
                reason: "background image is empty".into(),
            }
            .into());
        }
        log::info!(
            "heatmap renderer ready ({}x{}, alpha={}, colormap={}, bw_adjust={}, levels={}, thresh={})",
            background.width(),
            background.height(),
            options.alpha,
            options.colormap,
            options.bandwidth_adjust,
            options.levels,
            options.threshold
        );
        Ok(Self {
            background,
            options,
        })
    }

    pub fn options(&self) -> &HeatmapOptions {
        &self.options
    }

    /// Render `points` over the background and optionally write a PNG.
    ///
    /// An empty `points` slice is `Emission::NoOp`, not an error.
    pub fn render(&self, points: &[Point], output: Option<&Path>) -> Result<Emission> {
        if points.is_empty() {
            log::warn!("no detection points provided for heatmap");
            return Ok(Emission::NoOp);
        }

        let density = self.density(points);
        let peak = density.iter().copied().fold(0.0f32, f32::max);
        if !(peak.is_finite() && peak > 0.0) {
            return Err(HeatmapError::Render(format!(
                "no density inside the {}x{} background ({} points)",
                self.background.width(),
                self.background.height(),
                points.len()
            ))
            .into());
        }

        let image = self.overlay(&density, peak);
        if let Some(path) = output {
            image
                .save_with_format(path, ImageFormat::Png)
                .map_err(|e| HeatmapError::Render(format!("write {}: {}", path.display(), e)))
                .with_context(|| format!("saving heatmap overlay to {}", path.display()))?;
            log::info!("saved heatmap overlay to {}", path.display());
        }
        Ok(Emission::Rendered {
            image,
            path: output.map(Path::to_path_buf),
        })
    }

    /// Per-axis kernel bandwidth in pixels.
    fn bandwidth(&self, points: &[Point]) -> (f64, f64) {
        let n = points.len() as f64;
        let scott = n.powf(-1.0 / 6.0);
        let floor = (MIN_BANDWIDTH_FRACTION
            * self.background.width().min(self.background.height()) as f64)
            .max(1.0);
        let sx = sample_std(points.iter().map(|p| p.x as f64));
        let sy = sample_std(points.iter().map(|p| p.y as f64));
        let adjust = self.options.bandwidth_adjust;
        (
            (sx * scott * adjust).max(floor),
            (sy * scott * adjust).max(floor),
        )
    }

    /// Unnormalised density at every background pixel.
    ///
    /// Kernel weights are only computed for the part of each window that
    /// overlaps the background, so memory stays bounded by the canvas however
    /// wide the bandwidth gets.
    fn density(&self, points: &[Point]) -> Vec<f32> {
        let width = self.background.width() as i64;
        let height = self.background.height() as i64;
        let (bx, by) = self.bandwidth(points);
        let rx = (bx * KERNEL_RADIUS_SIGMAS).ceil() as i64;
        let ry = (by * KERNEL_RADIUS_SIGMAS).ceil() as i64;

        let mut grid = vec![0.0f32; (width * height) as usize];
        let mut wx: Vec<f32> = Vec::with_capacity(width as usize);
        for p in points {
            let (px, py) = (p.x as i64, p.y as i64);
            let x0 = px.saturating_sub(rx).max(0);
            let x1 = px.saturating_add(rx).min(width - 1);
            let y0 = py.saturating_sub(ry).max(0);
            let y1 = py.saturating_add(ry).min(height - 1);
            if x0 > x1 || y0 > y1 {
                continue;
            }
            // Separable Gaussian: one row profile per point, reused per row.
            wx.clear();
            wx.extend((x0..=x1).map(|x| gaussian((x - px) as f64, bx)));
            for y in y0..=y1 {
                let wy = gaussian((y - py) as f64, by);
                let row = (y * width + x0) as usize;
                for (cell, w) in grid[row..row + wx.len()].iter_mut().zip(&wx) {
                    *cell += wy * w;
                }
            }
        }
        grid
    }

    fn overlay(&self, density: &[f32], peak: f32) -> RgbImage {
        let levels = self.options.levels as f32;
        let alpha = self.options.alpha;
        let mut out = self.background.clone();
        for (i, pixel) in out.pixels_mut().enumerate() {
            let t = density[i] / peak;
            if t < self.options.threshold {
                continue;
            }
            let band = ((t * levels).floor() / levels).min(1.0);
            let color = self.options.colormap.sample(band);
            *pixel = blend(*pixel, color, alpha);
        }
        out
    }
}

fn blend(base: Rgb<u8>, color: [u8; 3], alpha: f32) -> Rgb<u8> {
    let mix = |b: u8, c: u8| (b as f32 * (1.0 - alpha) + c as f32 * alpha).round() as u8;
    Rgb([
        mix(base[0], color[0]),
        mix(base[1], color[1]),
        mix(base[2], color[2]),
    ])
}

/// Sample standard deviation (n - 1 denominator); 0 for fewer than two values.
fn gaussian(offset: f64, bandwidth: f64) -> f32 {
    (-0.5 * (offset / bandwidth).powi(2)).exp() as f32
}

fn sample_std(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n < 2 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}
