//! URL sources: a file downloaded over http(s), extracted when it is an archive.

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, ETAG, HeaderMap, IF_NONE_MATCH};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use super::archive::{self, ArchiveKind};
use super::{Materialized, Resolver, base};
use crate::core::{LogData, ResolveError};
use crate::metadata::PackageMeta;

static CONTENT_DISPOSITION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"filename=(?:"([\w\s\-.]+)"|([\w\s\-.]+))"#).expect("content disposition pattern is valid")
});

/// Response headers recorded in `_cacheHeaders` and compared by `has_new`.
const CACHE_HEADERS: &[&str] = &[
    "Content-MD5",
    "ETag",
    "Last-Modified",
    "Content-Language",
    "Content-Length",
    "Content-Type",
    "Content-Disposition",
];

const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

fn collect_cache_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    CACHE_HEADERS
        .iter()
        .filter_map(|name| {
            let value = headers.get(*name)?.to_str().ok()?;
            Some(((*name).to_string(), value.to_string()))
        })
        .collect()
}

/// `e-tag:` plus the first ten characters of the ETag, quotes trimmed.
fn etag_release(etag: &str) -> String {
    let head: String = etag.chars().take(10).collect();
    format!("e-tag:{}", head.trim_matches('"'))
}

/// File name for a download: the URL's last segment, overridden by Content-Disposition.
fn download_name(url: &str, headers: &HeaderMap) -> String {
    if let Some(disposition) = headers.get(CONTENT_DISPOSITION).and_then(|v| v.to_str().ok()) {
        if let Some(caps) = CONTENT_DISPOSITION_NAME.captures(disposition) {
            if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                let name = name.as_str().trim();
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or("");
    if last.is_empty() { "index".to_string() } else { last.to_string() }
}

/// A downloaded file and the response headers that came with it.
pub(super) struct Download {
    pub path: PathBuf,
    pub headers: HeaderMap,
}

impl Resolver {
    /// GETs `url` into `dir`.
    pub(super) async fn download(&self, url: &str, dir: &Path) -> Result<Download> {
        let failed = |reason: String| ResolveError::Download {
            url: url.to_string(),
            reason,
        };
        let response = self.ctx.http.get(url).send().await.map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("status code {}", status.as_u16())).into());
        }
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        let path = dir.join(download_name(url, &headers));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Download {
            path,
            headers,
        })
    }

    /// Extracts the download in place when it is an archive, then unwraps
    /// a single top-level directory.
    pub(super) async fn extract_download(&self, download: &Download, dir: &Path) -> Result<bool> {
        let mime = download.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let Some(kind) = ArchiveKind::detect(&download.path, mime) else {
            return Ok(false);
        };
        self.logger.action(
            "extract",
            &download.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            LogData::default().with_extra(serde_json::json!({ "archive": download.path })),
        );
        let (file, dest) = (download.path.clone(), dir.to_path_buf());
        tokio::task::spawn_blocking(move || -> Result<()> {
            archive::extract(&file, &dest, kind)?;
            std::fs::remove_file(&file)?;
            archive::move_single_dir_up(&dest)?;
            Ok(())
        })
        .await
        .context("spawn_blocking panicked")??;
        Ok(true)
    }

    pub(super) async fn materialize_url(&self, dir: &Path) -> Result<Materialized> {
        self.logger.action("download", &self.source, LogData::default());
        let download = self.download(&self.source, dir).await?;
        self.extract_download(&download, dir).await?;

        let rename_dir = dir.to_path_buf();
        let single_file = tokio::task::spawn_blocking(move || base::rename_single_file(&rename_dir))
            .await
            .context("spawn_blocking panicked")??;

        let release = download.headers.get(ETAG).and_then(|v| v.to_str().ok()).map(etag_release);
        Ok(Materialized {
            single_file,
            cache_headers: Some(collect_cache_headers(&download.headers)),
            release,
            ..Materialized::default()
        })
    }

    /// HEAD the URL: 304 means unchanged, errors and non-2xx mean changed,
    /// anything else compares the cache headers.
    pub(super) async fn url_has_new(&self, cached: &PackageMeta) -> bool {
        let old = cached.cache_headers.clone().unwrap_or_default();
        let mut request = self.ctx.http.head(&self.source).timeout(HEAD_TIMEOUT);
        if let Some(etag) = old.get("ETag") {
            request = request.header(IF_NONE_MATCH, etag.as_str());
        }
        match request.send().await {
            Ok(response) if response.status() == StatusCode::NOT_MODIFIED => false,
            Ok(response) if !response.status().is_success() => true,
            Ok(response) => collect_cache_headers(response.headers()) != old,
            Err(e) => {
                tracing::debug!(target: "resolver", "HEAD {} failed, assuming new content: {}", self.source, e);
                true
            }
        }
    }
}
