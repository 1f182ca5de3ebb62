//! # Pretrained Weight Tables
//!
//! Remote locations of the checkpoints a backbone can start from, keyed by
//! ``<arch>_<source>`` (e.g. ``resnet50_places``), and the
//! [`CheckpointSource`] collaborator that materializes them on disk at
//! ``<root>/pretrained_nets/<arch>_<source>.pth``.

use crate::cache::disk::DiskCacheConfig;
use crate::config::PretrainSource;
use anyhow::bail;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Static [`PretrainedWeightsDescriptor`] provider.
#[derive(Debug)]
pub struct StaticPretrainedWeightsDescriptor<'a> {
    /// Name of the weights, ``<arch>_<source>``.
    pub name: &'a str,

    /// Description of the weights.
    pub description: &'a str,

    /// License.
    pub license: Option<&'a str>,

    /// Source URL.
    pub origin: Option<&'a str>,

    /// URL to download the weights from.
    pub urls: &'a [&'a str],
}

impl StaticPretrainedWeightsDescriptor<'_> {
    /// Convert to a [`PretrainedWeightsDescriptor`].
    pub fn to_descriptor(&self) -> PretrainedWeightsDescriptor {
        PretrainedWeightsDescriptor {
            name: self.name.to_string(),
            description: self.description.to_string(),
            license: self.license.map(|s| s.to_string()),
            origin: self.origin.map(|s| s.to_string()),
            urls: self.urls.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A descriptor for a pretrained weights file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PretrainedWeightsDescriptor {
    /// Name of the weights, ``<arch>_<source>``.
    pub name: String,

    /// Description of the weights.
    pub description: String,

    /// License.
    pub license: Option<String>,

    /// Source URL.
    pub origin: Option<String>,

    /// URL to download the weights from.
    pub urls: Vec<String>,
}

impl PretrainedWeightsDescriptor {
    /// The cache file name, ``<name>.pth``.
    pub fn cache_key(&self) -> String {
        format!("{}.pth", self.name)
    }

    /// Read-Through Cache the Model Weights
    ///
    /// # Returns
    ///
    /// The disk location of the cached weights.
    pub fn fetch_weights_to_disk_cache(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> anyhow::Result<PathBuf> {
        let Some(url) = self.urls.first() else {
            bail!("no download location for {}", self.name);
        };
        disk_cache.fetch_resource(url, &[self.cache_key()])
    }
}

/// Static [`PretrainedWeightsMap`] builder.
#[derive(Debug)]
pub struct StaticPretrainedWeightsMap<'a> {
    /// List of static descriptors.
    pub items: &'a [&'a StaticPretrainedWeightsDescriptor<'a>],
}

impl StaticPretrainedWeightsMap<'_> {
    /// Convert to a [`PretrainedWeightsMap`].
    pub fn to_directory(&self) -> PretrainedWeightsMap {
        PretrainedWeightsMap {
            items: self
                .items
                .iter()
                .map(|d| {
                    let desc = d.to_descriptor();
                    (desc.name.clone(), desc)
                })
                .collect(),
        }
    }
}

/// Directory of [`PretrainedWeightsDescriptor`]s.
#[derive(Debug, Clone)]
pub struct PretrainedWeightsMap {
    /// Map of descriptors.
    pub items: BTreeMap<String, PretrainedWeightsDescriptor>,
}

impl PretrainedWeightsMap {
    /// Lookup a descriptor by name.
    pub fn lookup_by_name(
        &self,
        name: &str,
    ) -> Option<PretrainedWeightsDescriptor> {
        self.items.get(name).cloned()
    }

    /// Lookup a descriptor.
    pub fn try_lookup_by_name(
        &self,
        name: &str,
    ) -> anyhow::Result<PretrainedWeightsDescriptor> {
        match self.lookup_by_name(name) {
            Some(d) => Ok(d),
            None => bail!("no pretrained weights registered as {name:?}"),
        }
    }
}

/// The weights name for an ``(arch, source)`` pair.
pub fn weights_name(
    arch: &str,
    source: PretrainSource,
) -> String {
    format!("{arch}_{source}")
}

const TORCHVISION: Option<&str> = Some("https://github.com/pytorch/vision");
const BENCHMARK: Option<&str> =
    Some("https://github.com/gmberton/deep-visual-geo-localization-benchmark");

/// Every registered checkpoint.
pub static PRETRAINED_WEIGHTS: StaticPretrainedWeightsMap = StaticPretrainedWeightsMap {
    items: &[
        &StaticPretrainedWeightsDescriptor {
            name: "resnet18_imagenet",
            description: "ResNet-18 pretrained on ImageNet",
            license: Some("bsd-3-clause"),
            origin: TORCHVISION,
            urls: &["https://download.pytorch.org/models/resnet18-f37072fd.pth"],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "resnet50_imagenet",
            description: "ResNet-50 pretrained on ImageNet",
            license: Some("bsd-3-clause"),
            origin: TORCHVISION,
            urls: &["https://download.pytorch.org/models/resnet50-0676ba61.pth"],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "resnet101_imagenet",
            description: "ResNet-101 pretrained on ImageNet",
            license: Some("bsd-3-clause"),
            origin: TORCHVISION,
            urls: &["https://download.pytorch.org/models/resnet101-63fe2227.pth"],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "vgg16_imagenet",
            description: "VGG-16 pretrained on ImageNet",
            license: Some("bsd-3-clause"),
            origin: TORCHVISION,
            urls: &["https://download.pytorch.org/models/vgg16-397923af.pth"],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "alexnet_imagenet",
            description: "AlexNet pretrained on ImageNet",
            license: Some("bsd-3-clause"),
            origin: TORCHVISION,
            urls: &["https://download.pytorch.org/models/alexnet-owt-7be5be79.pth"],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "cct384_imagenet",
            description: "CCT-14/7x2 at 384px pretrained on ImageNet",
            license: Some("apache-2.0"),
            origin: Some("https://github.com/SHI-Labs/Compact-Transformers"),
            urls: &[
                "https://shi-labs.com/projects/cct/checkpoints/pretrained/cct_14_7x2_384_imagenet.pth",
            ],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "resnet18_places",
            description: "ResNet-18 pretrained on Places365",
            license: None,
            origin: BENCHMARK,
            urls: &[
                "https://drive.google.com/uc?export=download&id=1DnEQXhmPxtBUrRc81nAvT8z17bk-GBj5",
            ],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "resnet50_places",
            description: "ResNet-50 pretrained on Places365",
            license: None,
            origin: BENCHMARK,
            urls: &[
                "https://drive.google.com/uc?export=download&id=1zsY4mN4jJ-AsmV3h4hjbT72CBfJsgSGC",
            ],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "resnet101_places",
            description: "ResNet-101 pretrained on Places365",
            license: None,
            origin: BENCHMARK,
            urls: &[
                "https://drive.google.com/uc?export=download&id=1E1ibXQcg7qkmmmyYgmwMTh7Xf1cDNQXa",
            ],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "vgg16_places",
            description: "VGG-16 pretrained on Places365",
            license: None,
            origin: BENCHMARK,
            urls: &[
                "https://drive.google.com/uc?export=download&id=1UWl1uz6rZ6Nqmp1K5z3GHAIZJmDh4bDu",
            ],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "resnet18_gldv2",
            description: "ResNet-18 pretrained on Google Landmarks v2",
            license: None,
            origin: BENCHMARK,
            urls: &[
                "https://drive.google.com/uc?export=download&id=1wkUeUXFXuPHuEvGTXVpuP5BMB-JJ1xke",
            ],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "resnet50_gldv2",
            description: "ResNet-50 pretrained on Google Landmarks v2",
            license: None,
            origin: BENCHMARK,
            urls: &[
                "https://drive.google.com/uc?export=download&id=1UDUv6mszlXNC1lv6McLdeBNMq9-kaA70",
            ],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "resnet101_gldv2",
            description: "ResNet-101 pretrained on Google Landmarks v2",
            license: None,
            origin: BENCHMARK,
            urls: &[
                "https://drive.google.com/uc?export=download&id=1apiRxMJpDlV0XmKlC5Na_Drg2jtGL-uE",
            ],
        },
        &StaticPretrainedWeightsDescriptor {
            name: "vgg16_gldv2",
            description: "VGG-16 pretrained on Google Landmarks v2",
            license: None,
            origin: BENCHMARK,
            urls: &[
                "https://drive.google.com/uc?export=download&id=10Ov9JdO7gbyz6mB5x0v_VSAUMj91Ta4o",
            ],
        },
    ],
};

/// Checkpoint retrieval collaborator.
///
/// Resolves an ``(arch, source)`` pair to a local state-dictionary file.
pub trait CheckpointSource {
    /// Return the local checkpoint path, fetching it if needed.
    fn fetch(
        &self,
        arch: &str,
        source: PretrainSource,
    ) -> anyhow::Result<PathBuf>;
}

/// Read-through disk cache over [`PRETRAINED_WEIGHTS`].
#[derive(Debug, Clone)]
pub struct WeightCache {
    /// The disk cache layout.
    pub disk: DiskCacheConfig,

    /// Registered checkpoints.
    pub weights: PretrainedWeightsMap,
}

impl Default for WeightCache {
    fn default() -> Self {
        Self::new(DiskCacheConfig::default())
    }
}

impl WeightCache {
    /// A cache over the registered checkpoints.
    pub fn new(disk: DiskCacheConfig) -> Self {
        Self {
            disk,
            weights: PRETRAINED_WEIGHTS.to_directory(),
        }
    }

    /// The deterministic local path for an ``(arch, source)`` pair.
    pub fn checkpoint_path(
        &self,
        arch: &str,
        source: PretrainSource,
    ) -> PathBuf {
        self.disk
            .resource_to_path(&[format!("{}.pth", weights_name(arch, source))])
    }
}

impl CheckpointSource for WeightCache {
    fn fetch(
        &self,
        arch: &str,
        source: PretrainSource,
    ) -> anyhow::Result<PathBuf> {
        let name = weights_name(arch, source);
        let local = self.checkpoint_path(arch, source);
        if local.exists() {
            return Ok(local);
        }
        self.weights
            .try_lookup_by_name(&name)?
            .fetch_weights_to_disk_cache(&self.disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_descriptor_to_descriptor() {
        let s_desc = StaticPretrainedWeightsDescriptor {
            name: "my_model_places",
            description: "some description of my model.",
            urls: &["foo", "bar"],
            license: Some("MIT"),
            origin: Some("https://github.com/my_org/my_model"),
        };
        let d_desc = s_desc.to_descriptor();

        assert_eq!(d_desc.name, s_desc.name.to_string());
        assert_eq!(d_desc.description, s_desc.description.to_string());
        assert_eq!(d_desc.cache_key(), "my_model_places.pth");
        assert_eq!(
            d_desc.urls,
            s_desc
                .urls
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>()
        );
    }

    #[test]
    fn test_registered_weights() {
        let directory = PRETRAINED_WEIGHTS.to_directory();
        assert_eq!(directory.items.len(), PRETRAINED_WEIGHTS.items.len());

        for arch in ["resnet18", "resnet50", "resnet101", "vgg16"] {
            for source in [PretrainSource::Places, PretrainSource::Gldv2] {
                let name = weights_name(arch, source);
                assert!(directory.lookup_by_name(&name).is_some(), "{name}");
            }
        }
        assert!(directory.lookup_by_name("alexnet_places").is_none());
        assert!(directory.try_lookup_by_name("alexnet_gldv2").is_err());
    }

    #[test]
    fn test_checkpoint_path_is_deterministic() {
        let cache = WeightCache::new(DiskCacheConfig::rooted("data"));
        assert_eq!(
            cache.checkpoint_path("resnet50", PretrainSource::Gldv2),
            PathBuf::from("data/pretrained_nets/resnet50_gldv2.pth")
        );
    }

    #[test]
    fn test_fetch_uses_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::new(DiskCacheConfig::rooted(dir.path().to_string_lossy()));

        let local = cache.checkpoint_path("vgg16", PretrainSource::Places);
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, b"weights").unwrap();

        assert_eq!(cache.fetch("vgg16", PretrainSource::Places).unwrap(), local);
    }

    #[test]
    fn test_fetch_unregistered_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeightCache::new(DiskCacheConfig::rooted(dir.path().to_string_lossy()));

        let err = cache.fetch("alexnet", PretrainSource::Places).unwrap_err();
        assert!(err.to_string().contains("alexnet_places"));
    }
}
