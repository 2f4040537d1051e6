use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::DetectorSettings;
use crate::error::HeatmapError;
use crate::heatmap::{Colormap, HeatmapOptions};

pub const CONFIG_ENV: &str = "HEATMAPPER_CONFIG";

const DEFAULT_STREAM_LOCATION: &str = "stub://camera";
const DEFAULT_MODEL_PATH: &str = "stub://vehicles";
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_STORAGE_ROOT: &str = "storage";
const DEFAULT_FRAME_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_EMISSION_THRESHOLD: usize = 30;
const DEFAULT_CONFIDENCE: f32 = 0.3;
const DEFAULT_MAX_PENDING_UPLOADS: usize = 64;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    stream_location: Option<String>,
    background_image_path: Option<PathBuf>,
    /// Shorthand for `storage.container`.
    storage_container_name: Option<String>,
    #[serde(alias = "local_output_directory")]
    local_output_dir: Option<PathBuf>,
    frame_interval_seconds: Option<f64>,
    emission_threshold_count: Option<usize>,
    confidence_threshold: Option<f32>,
    model_path: Option<String>,
    detector: Option<DetectorSettings>,
    heatmap: Option<HeatmapOptions>,
    storage: Option<StorageConfigFile>,
    shutdown_policy: Option<ShutdownPolicy>,
    max_pending_uploads: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StorageConfigFile {
    backend: Option<StorageBackend>,
    container: Option<String>,
    local_root: Option<PathBuf>,
}

/// Where published artifacts go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Gcs,
}

impl FromStr for StorageBackend {
    type Err = HeatmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "gcs" => Ok(Self::Gcs),
            other => Err(HeatmapError::config(format!(
                "unknown storage backend '{}' (expected local or gcs)",
                other
            ))),
        }
    }
}

/// What happens to buffered points when the pipeline is interrupted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Drop whatever is buffered.
    #[default]
    Discard,
    /// Emit one final artifact pair from a non-empty buffer.
    Flush,
}

impl FromStr for ShutdownPolicy {
    type Err = HeatmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "flush" => Ok(Self::Flush),
            other => Err(HeatmapError::config(format!(
                "unknown shutdown policy '{}' (expected discard or flush)",
                other
            ))),
        }
    }
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discard => "discard",
            Self::Flush => "flush",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Bucket name (gcs) or subdirectory of `local_root` (local).
    pub container: String,
    pub local_root: PathBuf,
}

/// Immutable pipeline configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub stream_location: String,
    pub background_image_path: PathBuf,
    pub local_output_dir: PathBuf,
    pub frame_interval: Duration,
    pub emission_threshold: usize,
    pub confidence_threshold: f32,
    pub model_path: String,
    pub detector: DetectorSettings,
    pub heatmap: HeatmapOptions,
    pub storage: StorageSettings,
    pub shutdown_policy: ShutdownPolicy,
    pub max_pending_uploads: usize,
}

impl PipelineSettings {
    /// Read the file named by `HEATMAPPER_CONFIG` (if any), then apply env
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as `load`, with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PipelineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Storage section only, with env overrides. Listing tools use this so
    /// they do not need the capture settings.
    pub fn load_storage(path: Option<&Path>) -> Result<StorageSettings> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PipelineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        if cfg.storage.container.trim().is_empty() {
            return Err(
                HeatmapError::config("storage container is required (BUCKET_NAME)").into(),
            );
        }
        Ok(cfg.storage)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let storage = file.storage.unwrap_or_default();
        let container = match (file.storage_container_name, storage.container) {
            (Some(short), Some(nested)) if short != nested => {
                return Err(HeatmapError::config(format!(
                    "storage_container_name '{}' conflicts with storage.container '{}'",
                    short, nested
                ))
                .into());
            }
            (short, nested) => short.or(nested).unwrap_or_default(),
        };
        let interval_secs = file
            .frame_interval_seconds
            .unwrap_or(DEFAULT_FRAME_INTERVAL_SECS);
        if !(interval_secs.is_finite() && interval_secs >= 0.0) {
            return Err(HeatmapError::config(format!(
                "frame_interval_seconds must be a non-negative number, got {}",
                interval_secs
            ))
            .into());
        }
        Ok(Self {
            stream_location: file
                .stream_location
                .unwrap_or_else(|| DEFAULT_STREAM_LOCATION.to_string()),
            background_image_path: file.background_image_path.unwrap_or_default(),
            local_output_dir: file
                .local_output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            frame_interval: Duration::from_secs_f64(interval_secs),
            emission_threshold: file
                .emission_threshold_count
                .unwrap_or(DEFAULT_EMISSION_THRESHOLD),
            confidence_threshold: file.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE),
            model_path: file
                .model_path
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
            detector: file.detector.unwrap_or_default(),
            heatmap: file.heatmap.unwrap_or_default(),
            storage: StorageSettings {
                backend: storage.backend.unwrap_or_default(),
                container,
                local_root: storage
                    .local_root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT)),
            },
            shutdown_policy: file.shutdown_policy.unwrap_or_default(),
            max_pending_uploads: file
                .max_pending_uploads
                .unwrap_or(DEFAULT_MAX_PENDING_UPLOADS),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("STREAM_URL") {
            self.stream_location = url;
        }
        if let Some(path) = env_value("BACKGROUND_IMAGE_PATH") {
            self.background_image_path = PathBuf::from(path);
        }
        if let Some(bucket) = env_value("BUCKET_NAME") {
            self.storage.container = bucket;
        }
        if let Some(backend) = env_value("STORAGE_BACKEND") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(root) = env_value("STORAGE_LOCAL_ROOT") {
            self.storage.local_root = PathBuf::from(root);
        }
        if let Some(dir) = env_value("LOCAL_OUTPUT_DIR") {
            self.local_output_dir = PathBuf::from(dir);
        }
        if let Some(interval) = env_value("FRAME_INTERVAL") {
            let seconds = interval
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| {
                    HeatmapError::config("FRAME_INTERVAL must be a non-negative number of seconds")
                })?;
            self.frame_interval = Duration::from_secs_f64(seconds);
        }
        if let Some(count) = env_value("HEATMAP_INTERVAL") {
            self.emission_threshold = count.parse().map_err(|_| {
                HeatmapError::config("HEATMAP_INTERVAL must be a positive integer point count")
            })?;
        }
        if let Some(conf) = env_value("CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = conf
                .parse()
                .map_err(|_| HeatmapError::config("CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Some(model) = env_value("MODEL_PATH") {
            self.model_path = model;
        }
        if let Some(alpha) = env_value("HEATMAP_ALPHA") {
            self.heatmap.alpha = alpha
                .parse()
                .map_err(|_| HeatmapError::config("HEATMAP_ALPHA must be a number"))?;
        }
        if let Some(colormap) = env_value("HEATMAP_COLORMAP") {
            self.heatmap.colormap = colormap.parse::<Colormap>()?;
        }
        if let Some(policy) = env_value("SHUTDOWN_POLICY") {
            self.shutdown_policy = policy.parse()?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.stream_location.trim().is_empty() {
            return Err(HeatmapError::config("stream location must not be empty").into());
        }
        if self.background_image_path.as_os_str().is_empty() {
            return Err(HeatmapError::config(
                "background image path is required (BACKGROUND_IMAGE_PATH)",
            )
            .into());
        }
        if self.storage.container.trim().is_empty() {
            return Err(
                HeatmapError::config("storage container is required (BUCKET_NAME)").into(),
            );
        }
        if self.emission_threshold == 0 {
            return Err(HeatmapError::config("emission threshold must be at least 1").into());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(HeatmapError::config(format!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ))
            .into());
        }
        if self.detector.target_classes.is_empty() {
            return Err(HeatmapError::config("detector target classes must not be empty").into());
        }
        if !(self.detector.nms_threshold > 0.0 && self.detector.nms_threshold <= 1.0) {
            return Err(HeatmapError::config("detector nms_threshold must be within (0, 1]").into());
        }
        self.heatmap.validate()?;
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw).map_err(|e| {
        HeatmapError::config(format!("invalid config file {}: {}", path.display(), e))
    })?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_defaults_fill_every_field() {
        let cfg = PipelineSettings::from_file(PipelineConfigFile::default()).unwrap();
        assert_eq!(cfg.stream_location, DEFAULT_STREAM_LOCATION);
        assert_eq!(cfg.model_path, DEFAULT_MODEL_PATH);
        assert_eq!(cfg.frame_interval, Duration::from_secs(5));
        assert_eq!(cfg.emission_threshold, 30);
        assert_eq!(cfg.confidence_threshold, 0.3);
        assert_eq!(cfg.storage.backend, StorageBackend::Local);
        assert_eq!(cfg.shutdown_policy, ShutdownPolicy::Discard);
        assert_eq!(cfg.max_pending_uploads, 64);
        assert_eq!(cfg.heatmap, HeatmapOptions::default());
    }

    #[test]
    fn missing_required_fields_fail_validation() {
        let mut cfg = PipelineSettings::from_file(PipelineConfigFile::default()).unwrap();
        assert!(cfg.validate().is_err());
        cfg.background_image_path = PathBuf::from("bg.jpg");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("container"));
        cfg.storage.container = "traffic".into();
        assert!(cfg.validate().is_ok());

        cfg.emission_threshold = 0;
        assert!(cfg.validate().is_err());
        cfg.emission_threshold = 1;
        cfg.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn nested_file_sections_parse() {
        let file: PipelineConfigFile = serde_json::from_str(
            r#"{
                "heatmap": {"colormap": "viridis", "levels": 20},
                "detector": {"nms_threshold": 0.5, "target_classes": {"2": "Car"}},
                "storage": {"backend": "gcs", "container": "cams"},
                "shutdown_policy": "flush"
            }"#,
        )
        .unwrap();
        let cfg = PipelineSettings::from_file(file).unwrap();
        assert_eq!(cfg.heatmap.colormap, Colormap::Viridis);
        assert_eq!(cfg.heatmap.levels, 20);
        assert_eq!(cfg.heatmap.alpha, 0.4);
        assert_eq!(cfg.detector.nms_threshold, 0.5);
        assert_eq!(cfg.detector.target_classes.label(2), Some("Car"));
        assert!(!cfg.detector.target_classes.contains(7));
        assert_eq!(cfg.storage.backend, StorageBackend::Gcs);
        assert_eq!(cfg.shutdown_policy, ShutdownPolicy::Flush);
    }

    #[test]
    fn negative_interval_in_file_is_rejected() {
        let file: PipelineConfigFile =
            serde_json::from_str(r#"{"frame_interval_seconds": -1}"#).unwrap();
        assert!(PipelineSettings::from_file(file).is_err());
    }

    #[test]
    fn enum_names_parse_case_insensitively() {
        assert_eq!("FLUSH".parse::<ShutdownPolicy>().unwrap(), ShutdownPolicy::Flush);
        assert_eq!(" gcs ".parse::<StorageBackend>().unwrap(), StorageBackend::Gcs);
        assert!("s3".parse::<StorageBackend>().is_err());
        assert!("drain".parse::<ShutdownPolicy>().is_err());
    }

    fn parse(json: &str) -> Result<PipelineSettings> {
        let file: PipelineConfigFile = serde_json::from_str(json)?;
        PipelineSettings::from_file(file)
    }

    #[test]
    fn flat_container_and_output_directory_names_are_accepted() {
        let cfg = parse(
            r#"{"storage_container_name": "cams", "local_output_directory": "/srv/out"}"#,
        )
        .unwrap();
        assert_eq!(cfg.storage.container, "cams");
        assert_eq!(cfg.local_output_dir, PathBuf::from("/srv/out"));

        let cfg = parse(r#"{"storage_container_name": "cams", "storage": {"container": "cams"}}"#)
            .unwrap();
        assert_eq!(cfg.storage.container, "cams");
    }

    #[test]
    fn conflicting_container_names_are_rejected() {
        let err = parse(r#"{"storage_container_name": "cams", "storage": {"container": "x"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("conflicts"), "{err}");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<PipelineConfigFile>(r#"{"stream_url": "rtsp://x"}"#).is_err());
        assert!(
            serde_json::from_str::<PipelineConfigFile>(r#"{"storage": {"bucket": "x"}}"#).is_err()
        );
        assert!(
            serde_json::from_str::<PipelineConfigFile>(r#"{"heatmap": {"opacity": 0.5}}"#).is_err()
        );
    }
}
