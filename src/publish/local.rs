//! Filesystem-backed publisher: objects live at `<root>/<container>/<key>`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::Publisher;
use crate::error::HeatmapError;

pub struct LocalPublisher {
    container_dir: PathBuf,
}

impl LocalPublisher {
    pub fn new(root: &Path, container: &str) -> Result<Self> {
        if container.trim().is_empty() || container.contains(['/', '\\']) {
            return Err(HeatmapError::config(format!(
                "invalid storage container name '{}'",
                container
            ))
            .into());
        }
        let container_dir = root.join(container);
        fs::create_dir_all(&container_dir)
            .with_context(|| format!("create storage dir {}", container_dir.display()))?;
        log::info!("local publisher storing under {}", container_dir.display());
        Ok(Self { container_dir })
    }

    pub fn container_dir(&self) -> &Path {
        &self.container_dir
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, HeatmapError> {
        let rel = Path::new(key);
        let clean = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(HeatmapError::publish(key, "key must be a relative path without '..'"));
        }
        Ok(self.container_dir.join(rel))
    }
}

impl Publisher for LocalPublisher {
    fn name(&self) -> &str {
        "local"
    }

    fn publish(&mut self, local_path: &Path, key: &str) -> Result<()> {
        let dest = self.object_path(key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| HeatmapError::publish(key, e))?;
        }
        fs::copy(local_path, &dest).map_err(|e| {
            HeatmapError::publish(key, format!("copy from {}: {}", local_path.display(), e))
        })?;
        log::info!("uploaded {} to {}", local_path.display(), key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        collect_keys(&self.container_dir, "", &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

fn collect_keys(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("list {}", dir.display())),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = format!("{}{}", prefix, name);
        if entry.file_type()?.is_dir() {
            collect_keys(&entry.path(), &format!("{}/", key), out)?;
        } else {
            out.push(key);
        }
    }
    Ok(())
}
