#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Candidate};
use crate::error::HeatmapError;
use crate::frame::Frame;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// Expects a single `[1, 3, H, W]` float input scaled to 0..1 and a
/// `[1, 4 + classes, anchors]` output with center-format boxes in input pixels.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
    score_floor: f32,
    nms_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk. Any failure is a `ModelLoad` error.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = Self::load(model_path, input_width, input_height)
            .map_err(|e| HeatmapError::model_load(model_path.display().to_string(), format!("{:#}", e)))?;
        log::info!(
            "tract: loaded {} ({}x{} input)",
            model_path.display(),
            input_width,
            input_height
        );
        Ok(Self {
            model,
            input_width,
            input_height,
            score_floor: 0.05,
            nms_threshold: 0.45,
        })
    }

    fn load(
        model_path: &Path,
        input_width: u32,
        input_height: u32,
    ) -> Result<SimplePlan<TypedFact, Box<dyn TypedOp>>> {
        tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")
    }

    /// Drop raw boxes scoring below `floor` before NMS.
    pub fn with_score_floor(mut self, floor: f32) -> Self {
        self.score_floor = floor;
        self
    }

    /// IoU above which overlapping boxes of the same class are suppressed.
    pub fn with_nms_threshold(mut self, threshold: f32) -> Self {
        self.nms_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = imageops::resize(
            frame.image(),
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let width = self.input_width as usize;
        let pixels = resized.as_raw();
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, width),
            |(_, channel, y, x)| pixels[(y * width + x) * 3 + channel] as f32 / 255.0,
        )
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Candidate>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let classes = shape[1] - 4;
        let anchors = shape[2];

        let scale_x = frame.width() as f32 / self.input_width as f32;
        let scale_y = frame.height() as f32 / self.input_height as f32;
        let max_x = frame.width() as f32;
        let max_y = frame.height() as f32;

        let mut raw = Vec::new();
        for a in 0..anchors {
            let (mut best_class, mut best_score) = (0usize, f32::NEG_INFINITY);
            for c in 0..classes {
                let score = view[[0, 4 + c, a]];
                if score > best_score {
                    best_class = c;
                    best_score = score;
                }
            }
            if best_score < self.score_floor {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, a]],
                view[[0, 1, a]],
                view[[0, 2, a]],
                view[[0, 3, a]],
            );
            let x1 = ((cx - w / 2.0) * scale_x).clamp(0.0, max_x);
            let y1 = ((cy - h / 2.0) * scale_y).clamp(0.0, max_y);
            let x2 = ((cx + w / 2.0) * scale_x).clamp(0.0, max_x);
            let y2 = ((cy + h / 2.0) * scale_y).clamp(0.0, max_y);
            raw.push(RawBox {
                class_id: best_class as u32,
                confidence: best_score.clamp(0.0, 1.0),
                x1,
                y1,
                x2,
                y2,
            });
        }

        Ok(into_candidates(non_max_suppression(raw, self.nms_threshold)))
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn candidates(&mut self, frame: &Frame) -> Result<Vec<Candidate>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}

#[derive(Clone, Copy, Debug)]
struct RawBox {
    class_id: u32,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl RawBox {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &RawBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = ix * iy;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Per-class greedy NMS, highest confidence first.
fn non_max_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<RawBox> = Vec::new();
    for candidate in boxes {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// Degenerate boxes are dropped one at a time; the rest of the frame survives.
fn into_candidates(boxes: Vec<RawBox>) -> Vec<Candidate> {
    boxes
        .into_iter()
        .filter_map(|b| {
            match BoundingBox::new(b.x1 as i32, b.y1 as i32, b.x2 as i32, b.y2 as i32) {
                Ok(bbox) => Some(Candidate {
                    class_id: b.class_id,
                    confidence: b.confidence,
                    bbox,
                }),
                Err(e) => {
                    log::warn!("tract: dropping decoded box: {}", e);
                    None
                }
            }
        })
        .collect()
}
