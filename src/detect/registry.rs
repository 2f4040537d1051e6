use anyhow::Result;
use serde::Deserialize;

use super::backend::Detector;
use super::backends::StubBackend;
use super::result::TargetClasses;

/// Detector construction settings.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorSettings {
    /// Model input width in pixels.
    pub input_width: u32,
    /// Model input height in pixels.
    pub input_height: u32,
    /// IoU above which same-class boxes are suppressed.
    pub nms_threshold: f32,
    /// Raw scores below this never reach the label/threshold policy.
    pub score_floor: f32,
    /// Classes kept by the pipeline.
    pub target_classes: TargetClasses,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 640,
            nms_threshold: 0.45,
            score_floor: 0.05,
            target_classes: TargetClasses::vehicles(),
        }
    }
}

/// Open the detector named by `model_path`.
///
/// `stub://...` selects the deterministic stub. Anything else is treated as an
/// ONNX weights file and requires the `backend-tract` feature. Failure is a
/// `ModelLoad` error and is not retried.
pub fn open_detector(model_path: &str, settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    let mut detector: Box<dyn Detector> = if model_path.starts_with("stub://") {
        Box::new(StubBackend::new())
    } else {
        open_model(model_path, settings)?
    };
    detector.warm_up()?;
    log::info!(
        "detector '{}' ready (model={}, targets={:?})",
        detector.name(),
        model_path,
        settings.target_classes.ids().collect::<Vec<_>>()
    );
    Ok(detector)
}

#[cfg(feature = "backend-tract")]
fn open_model(model_path: &str, settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    let backend =
        super::backends::TractBackend::new(model_path, settings.input_width, settings.input_height)?
            .with_nms_threshold(settings.nms_threshold)
            .with_score_floor(settings.score_floor);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn open_model(model_path: &str, _settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    Err(crate::error::HeatmapError::model_load(
        model_path,
        "ONNX models require the backend-tract feature",
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeatmapError;

    #[test]
    fn stub_path_opens_stub_backend() {
        let detector = open_detector("stub://vehicles", &DetectorSettings::default()).unwrap();
        assert_eq!(detector.name(), "stub");
    }

    #[test]
    fn unloadable_model_is_model_load_error() {
        let err = open_detector("/nonexistent/yolov8l.onnx", &DetectorSettings::default())
            .err()
            .expect("must fail");
        let typed = err.downcast_ref::<HeatmapError>().expect("typed error");
        assert!(matches!(typed, HeatmapError::ModelLoad { .. }));
        assert!(typed.is_fatal());
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: DetectorSettings =
            serde_json::from_str(r#"{"nms_threshold": 0.6, "target_classes": {"2": "Car"}}"#)
                .unwrap();
        assert_eq!(settings.input_width, 640);
        assert_eq!(settings.nms_threshold, 0.6);
        assert!(!settings.target_classes.contains(7));
    }
}
