//! Google Cloud Storage publisher over the JSON API.
//!
//! Uploads use the simple media endpoint. Listing follows `nextPageToken`
//! until exhausted. A pre-issued bearer token can be supplied through
//! `GCS_ACCESS_TOKEN`; without one, requests go out anonymously.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use url::Url;

use super::{content_type_for, Publisher};
use crate::error::HeatmapError;

const API_BASE: &str = "https://storage.googleapis.com";
const TOKEN_ENV: &str = "GCS_ACCESS_TOKEN";

pub struct GcsPublisher {
    bucket: String,
    base: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
}

impl GcsPublisher {
    pub fn new(bucket: &str, token: Option<String>) -> Result<Self> {
        Self::with_base(bucket, API_BASE, token)
    }

    /// Bucket from settings, bearer token from `GCS_ACCESS_TOKEN` when set.
    pub fn from_env(bucket: &str) -> Result<Self> {
        let token = std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty());
        Self::new(bucket, token)
    }

    /// Point at a different API host (emulators).
    pub fn with_base(bucket: &str, base: &str, token: Option<String>) -> Result<Self> {
        if bucket.trim().is_empty() {
            return Err(HeatmapError::config("GCS bucket name is empty").into());
        }
        Url::parse(base).map_err(|e| HeatmapError::config(format!("bad GCS base url: {}", e)))?;
        log::info!(
            "gcs publisher for bucket {} ({})",
            bucket,
            if token.is_some() { "bearer token" } else { "anonymous" }
        );
        Ok(Self {
            bucket: bucket.to_string(),
            base: base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn upload_url(&self, key: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("GCS base url cannot carry a path"))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", self.bucket.as_str(), "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }

    fn list_url(&self, prefix: &str, page_token: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.base)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("GCS base url cannot carry a path"))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", self.bucket.as_str(), "o"]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("prefix", prefix)
                .append_pair("fields", "items/name,nextPageToken");
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }
}

impl Publisher for GcsPublisher {
    fn name(&self) -> &str {
        "gcs"
    }

    fn publish(&mut self, local_path: &Path, key: &str) -> Result<()> {
        let bytes = std::fs::read(local_path).map_err(|e| {
            HeatmapError::publish(key, format!("read {}: {}", local_path.display(), e))
        })?;
        let url = self.upload_url(key).map_err(|e| HeatmapError::publish(key, e))?;
        self.authorize(ureq::post(url.as_str()))
            .set("Content-Type", content_type_for(local_path))
            .send_bytes(&bytes)
            .map_err(|e| HeatmapError::publish(key, e))?;
        log::info!(
            "uploaded {} to gs://{}/{}",
            local_path.display(),
            self.bucket,
            key
        );
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = self.list_url(prefix, page_token.as_deref())?;
            let body = self
                .authorize(ureq::get(url.as_str()))
                .call()
                .with_context(|| format!("list gs://{}/{}", self.bucket, prefix))?
                .into_string()
                .context("read GCS list response")?;
            let page: ObjectList =
                serde_json::from_str(&body).context("parse GCS list response")?;
            keys.extend(page.items.into_iter().map(|o| o.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        keys.sort();
        Ok(keys)
    }
}
