//! Durable storage for emitted artifacts.
//!
//! A publisher makes a local file available under a remote key and can list
//! keys by prefix. Keys use `/` separators regardless of platform.

#[cfg(feature = "publish-gcs")]
mod gcs;
mod local;
mod pending;

#[cfg(feature = "publish-gcs")]
pub use gcs::GcsPublisher;
pub use local::LocalPublisher;
pub use pending::{PendingUpload, PendingUploads};

use anyhow::Result;
use std::path::Path;

use crate::artifact::{HEATMAP_PREFIX, LISTING_PREFIX};
use crate::config::{StorageBackend, StorageSettings};

pub trait Publisher {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Upload `local_path` under `key`. Failures are `HeatmapError::Publish`.
    fn publish(&mut self, local_path: &Path, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, in ascending order.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Sort keys newest first. Artifact names embed a sortable timestamp, so
/// reverse lexical order is reverse chronological order.
pub fn latest_first(mut keys: Vec<String>) -> Vec<String> {
    keys.sort_unstable_by(|a, b| b.cmp(a));
    keys
}

/// File extension each artifact prefix is expected to hold.
pub fn default_extension(prefix: &str) -> Option<&'static str> {
    match prefix {
        HEATMAP_PREFIX => Some(".png"),
        LISTING_PREFIX => Some(".csv"),
        _ => None,
    }
}

/// Keep keys ending in `ext`, ignoring ASCII case. An empty `ext` keeps all.
pub fn with_extension(keys: Vec<String>, ext: &str) -> Vec<String> {
    let ext = ext.to_ascii_lowercase();
    keys.into_iter()
        .filter(|key| key.to_ascii_lowercase().ends_with(&ext))
        .collect()
}

/// Build the publisher selected by `settings`.
pub fn open_publisher(settings: &StorageSettings) -> Result<Box<dyn Publisher>> {
    match settings.backend {
        StorageBackend::Local => Ok(Box::new(LocalPublisher::new(
            &settings.local_root,
            &settings.container,
        )?)),
        StorageBackend::Gcs => open_gcs(settings),
    }
}

#[cfg(feature = "publish-gcs")]
fn open_gcs(settings: &StorageSettings) -> Result<Box<dyn Publisher>> {
    Ok(Box::new(GcsPublisher::from_env(&settings.container)?))
}

#[cfg(not(feature = "publish-gcs"))]
fn open_gcs(_settings: &StorageSettings) -> Result<Box<dyn Publisher>> {
    Err(crate::error::HeatmapError::config(
        "storage backend 'gcs' requires the publish-gcs feature",
    )
    .into())
}

#[cfg(any(feature = "publish-gcs", test))]
fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("csv") => "text/csv",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}
