//! Artifact naming and the point-listing file.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::buffer::Point;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const HEATMAP_PREFIX: &str = "heatmaps/";
pub const LISTING_PREFIX: &str = "detections/";

/// File names and storage keys for one emission cycle. Both artifacts share
/// the same timestamp.
///
/// Timestamps have one-second resolution. A later cycle in the same second
/// carries a non-zero `sequence`, appended as `_<n>` after the timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactNames {
    pub timestamp: String,
    pub sequence: u32,
    pub heatmap_file: String,
    pub listing_file: String,
}

impl ArtifactNames {
    pub fn at<Tz: TimeZone>(time: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self::sequenced(time.format(TIMESTAMP_FORMAT).to_string(), 0)
    }

    fn sequenced(timestamp: String, sequence: u32) -> Self {
        let stem = match sequence {
            0 => timestamp.clone(),
            n => format!("{}_{}", timestamp, n),
        };
        Self {
            heatmap_file: format!("heatmap_{}.png", stem),
            listing_file: format!("detections_{}.csv", stem),
            timestamp,
            sequence,
        }
    }

    /// Names for `time` that cannot collide with `previous`.
    pub fn after<Tz: TimeZone>(time: &DateTime<Tz>, previous: Option<&ArtifactNames>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let names = Self::at(time);
        match previous {
            Some(prev) if prev.timestamp == names.timestamp => {
                Self::sequenced(names.timestamp, prev.sequence + 1)
            }
            _ => names,
        }
    }

    pub fn heatmap_key(&self) -> String {
        format!("{}{}", HEATMAP_PREFIX, self.heatmap_file)
    }

    pub fn listing_key(&self) -> String {
        format!("{}{}", LISTING_PREFIX, self.listing_file)
    }

    pub fn heatmap_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.heatmap_file)
    }

    pub fn listing_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.listing_file)
    }
}

/// Write `points` as CSV: an `x,y` header then one row per point, in order.
pub fn write_point_listing(points: &[Point], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("create point listing {}", path.display()))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "x,y")?;
    for p in points {
        writeln!(out, "{},{}", p.x, p.y)?;
    }
    out.flush()
        .with_context(|| format!("flush point listing {}", path.display()))?;
    log::info!("saved {} detection points to {}", points.len(), path.display());
    Ok(())
}
