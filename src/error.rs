//! Error taxonomy for the heatmap pipeline.
//!
//! Setup failures (`SourceUnavailable`, `ModelLoad`, `BackgroundUnavailable`,
//! `Config`) abort startup. The rest are raised inside a loop iteration and are
//! logged at the iteration boundary; none of them stops the pipeline.
//!
//! Plumbing code returns `anyhow::Result`; these variants travel inside it and
//! can be recovered with `err.downcast_ref::<HeatmapError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeatmapError {
    #[error("frame source unavailable at {location}: {reason}")]
    SourceUnavailable { location: String, reason: String },

    #[error("failed to load detection model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("background image unavailable at {path}: {reason}")]
    BackgroundUnavailable { path: String, reason: String },

    #[error("invalid detection: {0}")]
    InvalidDetection(String),

    #[error("heatmap render failed: {0}")]
    Render(String),

    #[error("publish of {key} failed: {reason}")]
    Publish { key: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl HeatmapError {
    pub fn source_unavailable(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn model_load(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn publish(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Publish {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for errors that must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. }
                | Self::ModelLoad { .. }
                | Self::BackgroundUnavailable { .. }
                | Self::Config(_)
        )
    }
}
