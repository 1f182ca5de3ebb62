//! # Transformer Hub
//!
//! Named transformer checkpoints (``google/vit-base-patch16-224-in21k``)
//! resolved to local files under ``<root>/pretrained_nets/hub/``.

use crate::cache::disk::DiskCacheConfig;
use anyhow::bail;
use std::path::PathBuf;

const X25: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);

/// Build a cache key (bare cache file name) from a name and URL.
///
/// The key is ``{name}-{url crc hash}-{url basename}``; ``/`` in the name
/// is flattened to ``--``.
pub fn url_to_cache_key(
    name: Option<&str>,
    url: &str,
) -> String {
    let hash = X25.checksum(url.as_bytes()).to_string();
    let base_name = url.rsplit_once('/').map_or(url, |(_, base)| base);
    match name {
        Some(n) => format!("{}-{}-{}", n.replace('/', "--"), hash, base_name),
        None => format!("{}-{}", hash, base_name),
    }
}

/// Transformer hub collaborator.
pub trait TransformerHub {
    /// Resolve a named checkpoint to a local state-dictionary file.
    fn resolve(
        &self,
        model_name: &str,
    ) -> anyhow::Result<PathBuf>;
}

/// Read-through disk cache over a HuggingFace-style hub.
#[derive(Debug, Clone)]
pub struct HubCache {
    /// The disk cache layout.
    pub disk: DiskCacheConfig,

    /// Hub endpoint.
    pub endpoint: String,

    /// Checkpoint file inside each model repository.
    pub file_name: String,
}

impl Default for HubCache {
    fn default() -> Self {
        Self::new(DiskCacheConfig::default())
    }
}

impl HubCache {
    /// A hub cache on the public endpoint.
    pub fn new(disk: DiskCacheConfig) -> Self {
        Self {
            disk,
            endpoint: "https://huggingface.co".to_string(),
            file_name: "pytorch_model.bin".to_string(),
        }
    }

    /// The download URL of a named checkpoint.
    pub fn model_url(
        &self,
        model_name: &str,
    ) -> String {
        format!(
            "{}/{}/resolve/main/{}",
            self.endpoint.trim_end_matches('/'),
            model_name,
            self.file_name
        )
    }

    /// The cache resource key of a named checkpoint.
    pub fn resource_key(
        &self,
        model_name: &str,
    ) -> Vec<String> {
        let url = self.model_url(model_name);
        vec!["hub".to_string(), url_to_cache_key(Some(model_name), &url)]
    }
}

impl TransformerHub for HubCache {
    fn resolve(
        &self,
        model_name: &str,
    ) -> anyhow::Result<PathBuf> {
        if model_name.is_empty() || model_name.starts_with('/') {
            bail!("invalid hub model name: {model_name:?}");
        }
        let url = self.model_url(model_name);
        self.disk
            .fetch_resource(&url, &self.resource_key(model_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_to_cache_key() {
        let url = "https://huggingface.co/google/vit-base-patch16-384/resolve/main/pytorch_model.bin";
        let hash = X25.checksum(url.as_bytes()).to_string();

        assert_eq!(
            url_to_cache_key(Some("google/vit-base-patch16-384"), url),
            format!("google--vit-base-patch16-384-{hash}-pytorch_model.bin")
        );
        assert_eq!(
            url_to_cache_key(None, url),
            format!("{hash}-pytorch_model.bin")
        );
    }

    #[test]
    fn test_model_url() {
        let hub = HubCache::new(DiskCacheConfig::rooted("data"));
        assert_eq!(
            hub.model_url("google/vit-base-patch16-224-in21k"),
            "https://huggingface.co/google/vit-base-patch16-224-in21k/resolve/main/pytorch_model.bin"
        );

        let key = hub.resource_key("google/vit-base-patch16-224-in21k");
        assert_eq!(key[0], "hub");
        assert!(key[1].starts_with("google--vit-base-patch16-224-in21k-"));
    }

    #[test]
    fn test_resolve_cached() {
        let dir = tempfile::tempdir().unwrap();
        let hub = HubCache::new(DiskCacheConfig::rooted(dir.path().to_string_lossy()));

        let name = "google/vit-base-patch16-384";
        let path = hub
            .disk
            .ensure_resource_parent_dir(&hub.resource_key(name))
            .unwrap();
        std::fs::write(&path, b"weights").unwrap();

        assert_eq!(hub.resolve(name).unwrap(), path);
        assert!(hub.resolve("").is_err());
    }
}
