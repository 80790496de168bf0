use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use sha2::{Digest, Sha256};
use url::Url;

use crate::images::ImageReference;

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "wiki-md/0.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 5;
const KNOWN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "svg", "webp"];
const DEFAULT_EXTENSION: &str = "png";
const DEFAULT_FOLDER_NAME: &str = "wiki_page";
const MAX_FOLDER_NAME_LEN: usize = 100;

static UNSAFE_CHARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[/\\?%*:|"<>]"#).unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ── Public types ─────────────────────────────────────────────────────────────

/// Original image URL → relative local reference (`./<dir>/<file>`).
pub type AssetMap = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub source_url: String,
    pub success: bool,
    pub local_path: Option<PathBuf>,
    pub in_table: bool,
}

#[derive(Debug, Default)]
pub struct DownloadBatch {
    pub assets: AssetMap,
    /// `None` when no staging directory could be prepared.
    pub staging_dir: Option<PathBuf>,
    pub results: Vec<DownloadResult>,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid image url {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned {0}")]
    Status(reqwest::StatusCode),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetches page images into a per-page staging directory.
#[derive(Debug, Clone)]
pub struct AssetDownloader {
    client: reqwest::Client,
    staging_root: PathBuf,
}

// ── Downloader ───────────────────────────────────────────────────────────────

impl AssetDownloader {
    pub fn new(staging_root: impl Into<PathBuf>, insecure: bool) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT);
        if insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            client: builder.build()?,
            staging_root: staging_root.into(),
        })
    }

    /// Download every image concurrently and map each successful source URL
    /// to its relative local path.
    ///
    /// The staging directory `{title}_{hash(page_identity)}` under the
    /// staging root is cleared first; if it cannot be prepared there the
    /// current directory is tried, and failing that an empty batch is
    /// returned. Individual failures are logged and never abort the batch.
    pub async fn download_all(
        &self,
        images: &[ImageReference],
        base_url: &str,
        headers: &HeaderMap,
        page_identity: &str,
        title: &str,
    ) -> DownloadBatch {
        let folder_name = staging_folder_name(title, page_identity);
        let Some(staging_dir) = self.prepare_staging_dir(&folder_name).await else {
            return DownloadBatch::default();
        };

        let tasks = images.iter().enumerate().map(|(index, image)| {
            self.download_one(image, index, base_url, headers, &staging_dir)
        });
        let results = join_all(tasks).await;

        let mut assets = AssetMap::new();
        for result in results.iter().filter(|r| r.success) {
            if let Some(file_name) = result.local_path.as_deref().and_then(Path::file_name) {
                let relative = format!("./{}/{}", folder_name, file_name.to_string_lossy());
                assets.insert(result.source_url.clone(), relative);
            }
        }

        tracing::info!(
            attempted = results.len(),
            downloaded = assets.len(),
            dir = %staging_dir.display(),
            "image downloads settled"
        );

        DownloadBatch {
            assets,
            staging_dir: Some(staging_dir),
            results,
        }
    }

    async fn download_one(
        &self,
        image: &ImageReference,
        index: usize,
        base_url: &str,
        headers: &HeaderMap,
        dir: &Path,
    ) -> DownloadResult {
        match self.fetch_to_file(image, index, base_url, headers, dir).await {
            Ok(path) => {
                tracing::debug!(src = %image.source_url, path = %path.display(), in_table = image.in_table, "image saved");
                DownloadResult {
                    source_url: image.source_url.clone(),
                    success: true,
                    local_path: Some(path),
                    in_table: image.in_table,
                }
            }
            Err(e) => {
                tracing::warn!(src = %image.source_url, error = %e, "image download failed");
                DownloadResult {
                    source_url: image.source_url.clone(),
                    success: false,
                    local_path: None,
                    in_table: image.in_table,
                }
            }
        }
    }

    async fn fetch_to_file(
        &self,
        image: &ImageReference,
        index: usize,
        base_url: &str,
        headers: &HeaderMap,
        dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let url = resolve_image_url(&image.source_url, base_url)
            .ok_or_else(|| DownloadError::InvalidUrl(image.source_url.clone()))?;

        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_lowercase());
        let extension = pick_extension(content_type.as_deref(), &url);
        let bytes = response.bytes().await?;

        let table_suffix = if image.in_table { "_table" } else { "" };
        let path = dir.join(format!("img_{}{}.{}", index, table_suffix, extension));
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }

    async fn prepare_staging_dir(&self, folder_name: &str) -> Option<PathBuf> {
        let primary = self.staging_root.join(folder_name);
        match reset_dir(&primary).await {
            Ok(()) => return Some(primary),
            Err(e) => {
                tracing::warn!(dir = %primary.display(), error = %e, "cannot prepare staging dir, trying current dir");
            }
        }

        let fallback = match std::env::current_dir() {
            Ok(cwd) => cwd.join(folder_name),
            Err(e) => {
                tracing::warn!(error = %e, "no current dir, skipping image downloads");
                return None;
            }
        };
        match reset_dir(&fallback).await {
            Ok(()) => Some(fallback),
            Err(e) => {
                tracing::warn!(dir = %fallback.display(), error = %e, "cannot prepare fallback staging dir, skipping image downloads");
                None
            }
        }
    }
}

/// Remove `dir` if present and create it afresh.
async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(dir).await? {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await
}

// ── URL and naming helpers ───────────────────────────────────────────────────

/// Make an image `src` absolute: absolute URLs pass through, `//host/x`
/// gets `https:`, `/x` is resolved against the origin of `base_url`, and
/// anything else is joined onto `base_url`.
pub fn resolve_image_url(src: &str, base_url: &str) -> Option<Url> {
    if let Some(rest) = src.strip_prefix("//") {
        return Url::parse(&format!("https://{}", rest)).ok();
    }
    if let Ok(absolute) = Url::parse(src) {
        return Some(absolute);
    }
    let base = Url::parse(base_url).ok()?;
    if src.starts_with('/') {
        return Url::parse(&format!("{}{}", base.origin().ascii_serialization(), src)).ok();
    }
    base.join(src).ok()
}

fn pick_extension(content_type: Option<&str>, url: &Url) -> &'static str {
    if let Some(ct) = content_type {
        let from_type = if ct.contains("jpeg") || ct.contains("jpg") {
            Some("jpg")
        } else if ct.contains("png") {
            Some("png")
        } else if ct.contains("gif") {
            Some("gif")
        } else if ct.contains("svg") {
            Some("svg")
        } else if ct.contains("webp") {
            Some("webp")
        } else {
            None
        };
        if let Some(ext) = from_type {
            return ext;
        }
    }

    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .and_then(|ext| KNOWN_EXTENSIONS.iter().find(|known| **known == ext).copied())
        .unwrap_or(DEFAULT_EXTENSION)
}

/// `{sanitized title}_{first 8 hex chars of sha256(page identity)}`.
pub fn staging_folder_name(title: &str, page_identity: &str) -> String {
    let identity = if page_identity.is_empty() {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().to_string())
            .unwrap_or_default()
    } else {
        page_identity.to_string()
    };

    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    let mut name = sanitize_folder_name(title);
    if name.is_empty() {
        name = DEFAULT_FOLDER_NAME.to_string();
    }
    format!("{}_{}", name, &digest[..8])
}

fn sanitize_folder_name(title: &str) -> String {
    let cleaned = UNSAFE_CHARS_RE.replace_all(title.trim(), "");
    let cleaned = WHITESPACE_RE.replace_all(&cleaned, "_");
    cleaned
        .chars()
        .filter(char::is_ascii)
        .take(MAX_FOLDER_NAME_LEN)
        .collect()
}
