use serde::Deserialize;
use std::collections::BTreeMap;

use crate::buffer::Point;
use crate::error::HeatmapError;

/// Axis-aligned box in frame pixels. Always satisfies `x1 <= x2` and `y1 <= y2`.
///
/// Only `BoundingBox::new` can build one:
///
/// ```compile_fail
/// let _ = heatmapper::BoundingBox { x1: 30, y1: 0, x2: 10, y2: 5 };
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self, HeatmapError> {
        if x1 > x2 || y1 > y2 {
            return Err(HeatmapError::InvalidDetection(format!(
                "bbox corners out of order: ({}, {}, {}, {})",
                x1, y1, x2, y2
            )));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Corners as `(x1, y1, x2, y2)`.
    pub fn corners(&self) -> (i32, i32, i32, i32) {
        (self.x1, self.y1, self.x2, self.y2)
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Centroid with integer truncation toward zero.
    pub fn center(&self) -> Point {
        let cx = (self.x1 as i64 + self.x2 as i64) / 2;
        let cy = (self.y1 as i64 + self.y2 as i64) / 2;
        Point::new(cx as i32, cy as i32)
    }
}

/// Raw backend output before the label/threshold policy is applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// One recognized object instance.
///
/// Fields are private so confidence and box ordering are always validated:
///
/// ```compile_fail
/// use heatmapper::{BoundingBox, Detection};
/// let bbox = BoundingBox::new(0, 0, 4, 4).unwrap();
/// let _ = Detection { class_id: 2, label: "Car".to_string(), confidence: 7.0, bbox };
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    class_id: u32,
    label: String,
    confidence: f32,
    bbox: BoundingBox,
}

impl Detection {
    pub fn new(
        class_id: u32,
        label: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Result<Self, HeatmapError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(HeatmapError::InvalidDetection(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }
        Ok(Self {
            class_id,
            label: label.into(),
            confidence,
            bbox,
        })
    }

    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn center(&self) -> Point {
        self.bbox.center()
    }
}

/// Class id to label mapping used to filter detections.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct TargetClasses(BTreeMap<u32, String>);

impl TargetClasses {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(id, label)| (id, label.into()))
                .collect(),
        )
    }

    /// COCO vehicle classes.
    pub fn vehicles() -> Self {
        Self::new([(2, "Car"), (3, "Motorcycle"), (5, "Bus"), (7, "Truck")])
    }

    pub fn label(&self, class_id: u32) -> Option<&str> {
        self.0.get(&class_id).map(String::as_str)
    }

    pub fn contains(&self, class_id: u32) -> bool {
        self.0.contains_key(&class_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().copied()
    }
}

impl Default for TargetClasses {
    fn default() -> Self {
        Self::vehicles()
    }
}

/// Keep candidates whose class is targeted and whose confidence reaches the threshold.
///
/// Backend order is preserved. Labels come from `targets`.
pub fn retain_targets(
    candidates: impl IntoIterator<Item = Candidate>,
    targets: &TargetClasses,
    confidence_threshold: f32,
) -> Vec<Detection> {
    candidates
        .into_iter()
        .filter(|c| c.confidence >= confidence_threshold)
        .filter_map(|c| {
            let label = targets.label(c.class_id)?;
            match Detection::new(c.class_id, label, c.confidence, c.bbox) {
                Ok(det) => Some(det),
                Err(e) => {
                    log::warn!("dropping candidate: {}", e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(class_id: u32, confidence: f32) -> Candidate {
        Candidate {
            class_id,
            confidence,
            bbox: BoundingBox::new(0, 0, 10, 10).unwrap(),
        }
    }

    #[test]
    fn center_truncates() {
        let bbox = BoundingBox::new(10, 20, 30, 40).unwrap();
        assert_eq!(bbox.center(), Point::new(20, 30));
        let odd = BoundingBox::new(1, 1, 4, 6).unwrap();
        assert_eq!(odd.center(), Point::new(2, 3));
    }

    #[test]
    fn rejects_unordered_corners() {
        assert!(BoundingBox::new(30, 20, 10, 40).is_err());
        assert!(BoundingBox::new(10, 40, 30, 20).is_err());
        assert!(BoundingBox::new(5, 5, 5, 5).is_ok());
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let bbox = BoundingBox::new(0, 0, 1, 1).unwrap();
        assert!(Detection::new(2, "Car", 1.2, bbox).is_err());
        assert!(Detection::new(2, "Car", f32::NAN, bbox).is_err());
        assert!(Detection::new(2, "Car", 1.0, bbox).is_ok());
    }

    #[test]
    fn retain_targets_filters_by_class_and_threshold() {
        let targets = TargetClasses::vehicles();
        let kept = retain_targets(
            vec![
                candidate(2, 0.9),
                candidate(0, 0.99), // person
                candidate(7, 0.3),  // exactly at threshold
                candidate(5, 0.29),
                candidate(3, 0.5),
            ],
            &targets,
            0.3,
        );
        let summary: Vec<(u32, &str)> = kept.iter().map(|d| (d.class_id(), d.label())).collect();
        assert_eq!(summary, vec![(2, "Car"), (7, "Truck"), (3, "Motorcycle")]);
    }

    #[test]
    fn target_classes_deserialize_from_string_keys() {
        let targets: TargetClasses = serde_json::from_str(r#"{"2": "Car", "8": "Boat"}"#).unwrap();
        assert_eq!(targets.label(8), Some("Boat"));
        assert!(!targets.contains(7));
    }
}
