//! # Disk Cache Policy

use crate::errors::panic_message;
use anyhow::{Context, anyhow, bail};
use burn::config::Config;
use burn::data::network::downloader;
use std::ffi::OsString;
use std::fs::{File, remove_file, rename};
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

/// Disk cache layout.
///
/// Resources live under ``<root>/<weights_dir>/...``.
#[derive(Config, Debug)]
pub struct DiskCacheConfig {
    /// Root cache directory.
    #[config(default = "\"data\".to_string()")]
    pub root: String,

    /// Weights subdirectory.
    #[config(default = "\"pretrained_nets\".to_string()")]
    pub weights_dir: String,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCacheConfig {
    /// A cache rooted at `root`.
    pub fn rooted<S: Into<String>>(root: S) -> Self {
        Self::new().with_root(root.into())
    }

    /// The weights directory.
    ///
    /// Does not create it.
    pub fn base_cache_dir(&self) -> PathBuf {
        Path::new(&self.root).join(&self.weights_dir)
    }

    /// Map a resource key to a cache path.
    ///
    /// Does not ensure that the path (or any of the parents) exist.
    pub fn resource_to_path(
        &self,
        resource_key: &[String],
    ) -> PathBuf {
        resource_key
            .iter()
            .fold(self.base_cache_dir(), |acc, s| acc.join(s))
    }

    /// Map a resource key to a cache path and ensure the parent directory exists.
    pub fn ensure_resource_parent_dir(
        &self,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        let path = self.resource_to_path(resource_key);
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating cache directory {parent:?}"))?;
            }
        }
        Ok(path)
    }

    /// Fetch a Resource to the Cache.
    pub fn fetch_resource(
        &self,
        url: &str,
        resource: &[String],
    ) -> anyhow::Result<PathBuf> {
        let cache_file_path = self.ensure_resource_parent_dir(resource)?;
        try_cache_download_to_path(url, cache_file_path)
    }
}

/// The in-progress download path for `path`: ``<path>.part``.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Reject payloads that cannot be checkpoints.
///
/// The downloader does not surface HTTP status; error pages and download
/// confirmation pages arrive as HTML bodies.
pub fn check_payload(
    url: &str,
    bytes: &[u8],
) -> anyhow::Result<()> {
    if bytes.is_empty() {
        bail!("{url} returned an empty body");
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(64)]).to_ascii_lowercase();
    let head = head.trim_start();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        bail!("{url} returned an HTML page, not a checkpoint");
    }
    Ok(())
}

/// Download a URL resource to a given path.
///
/// If the path already exists, does nothing. Otherwise the body is written
/// to [`partial_path`] and renamed into place, so a failed download never
/// leaves a cache entry behind.
///
/// # Returns
///
/// The cache path.
pub fn try_cache_download_to_path(
    url: &str,
    cache_file_path: PathBuf,
) -> anyhow::Result<PathBuf> {
    if cache_file_path.exists() {
        tracing::debug!(path = ?cache_file_path, "cache hit");
        return Ok(cache_file_path);
    }

    let file_name = match cache_file_path.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None => bail!("cache path has no file name: {cache_file_path:?}"),
    };

    tracing::info!(url, path = ?cache_file_path, "downloading weights");
    // The downloader panics on network errors.
    let bytes = catch_unwind(AssertUnwindSafe(|| {
        downloader::download_file_as_bytes(url, &file_name)
    }))
    .map_err(|payload| anyhow!("downloading {url}: {}", panic_message(payload)))?;
    check_payload(url, &bytes)?;

    let partial = partial_path(&cache_file_path);
    let written = File::create(&partial)
        .and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        })
        .with_context(|| format!("writing {partial:?}"));
    if let Err(err) = written {
        let _ = remove_file(&partial);
        return Err(err);
    }
    rename(&partial, &cache_file_path)
        .with_context(|| format!("moving {partial:?} into place"))?;

    Ok(cache_file_path)
}
