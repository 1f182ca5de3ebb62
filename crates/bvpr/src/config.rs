//! # Network Configuration
//!
//! [`GeoLocalizationConfig`] is the flat, declarative option record consumed
//! (read-only) by assembly. The string-valued options are parsed into the
//! closed identifier enums of this module; unknown values are
//! [`Error::Configuration`] errors.

use crate::errors::Error;
use crate::features::FeatureShape;
use burn::config::Config;
use std::fmt;

/// Declarative network configuration.
#[derive(Config, Debug)]
pub struct GeoLocalizationConfig {
    /// Backbone identifier; see [`BackboneKind`].
    #[config(default = "\"resnet18conv4\".to_string()")]
    pub backbone: String,

    /// Pretrain source; see [`PretrainSource`].
    #[config(default = "\"none\".to_string()")]
    pub pretrain: String,

    /// Aggregation identifier; see [`AggregationKind`].
    #[config(default = "\"netvlad\".to_string()")]
    pub aggregation: String,

    /// L2 normalization placement for pooling aggregations; see [`L2Placement`].
    #[config(default = "\"before_pool\".to_string()")]
    pub l2: String,

    /// Optional output projection dimension.
    #[config(default = "None")]
    pub fc_output_dim: Option<usize>,

    /// Residual freeze boundary; children before it are frozen.
    #[config(default = "\"layer3\".to_string()")]
    pub resnet_layer: String,

    /// Truncate transformer encoders to the first `trunc_te` blocks.
    #[config(default = "None")]
    pub trunc_te: Option<usize>,

    /// Freeze transformer encoders up to (and including) block `freeze_te`.
    #[config(default = "None")]
    pub freeze_te: Option<usize>,

    /// Number of trailing EndoFM blocks left trainable.
    #[config(default = "2")]
    pub trainable_vit_blocks: usize,

    /// Image resize, ``[height, width]``.
    #[config(default = "[480, 640]")]
    pub resize: [usize; 2],

    /// Number of clusters for cluster-based aggregation.
    #[config(default = "64")]
    pub netvlad_clusters: usize,

    /// Attach a [`crate::comparer::FeatureComparer`] head.
    #[config(default = "false")]
    pub use_mlp: bool,

    /// Explicit local checkpoint; overrides retrieval.
    #[config(default = "None")]
    pub checkpoint: Option<String>,

    /// Root directory of the pretrained weight cache.
    #[config(default = "\"data\".to_string()")]
    pub weights_root: String,
}

impl Default for GeoLocalizationConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoLocalizationConfig {
    /// Parse the backbone identifier.
    pub fn backbone_kind(&self) -> crate::errors::Result<BackboneKind> {
        BackboneKind::parse(&self.backbone)
    }

    /// Parse the pretrain source.
    pub fn pretrain_source(&self) -> crate::errors::Result<PretrainSource> {
        PretrainSource::parse(&self.pretrain)
    }

    /// Parse the aggregation identifier.
    pub fn aggregation_kind(&self) -> crate::errors::Result<AggregationKind> {
        AggregationKind::from_name(&self.aggregation)
            .ok_or_else(|| Error::config(format!("unknown aggregation: {:?}", self.aggregation)))
    }

    /// Parse the L2 placement.
    pub fn l2_placement(&self) -> crate::errors::Result<L2Placement> {
        L2Placement::parse(&self.l2)
    }
}

/// `ResNet` depth variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResNetDepth {
    /// `ResNet-18`, basic blocks.
    R18,
    /// `ResNet-50`, bottleneck blocks.
    R50,
    /// `ResNet-101`, bottleneck blocks.
    R101,
}

impl ResNetDepth {
    /// The architecture name, as used by weight tables.
    pub fn arch_name(&self) -> &'static str {
        match self {
            Self::R18 => "resnet18",
            Self::R50 => "resnet50",
            Self::R101 => "resnet101",
        }
    }
}

/// The last residual stage kept by a `ResNet` backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResNetStage {
    /// Keep up to ``conv4_x`` (``layer3``).
    Conv4,
    /// Keep up to ``conv5_x`` (``layer4``).
    Conv5,
}

impl ResNetStage {
    /// Number of trailing top-level children dropped from the classifier.
    pub fn dropped_children(&self) -> usize {
        match self {
            Self::Conv4 => 3,
            Self::Conv5 => 2,
        }
    }
}

/// The five backbone families; each has its own freeze/truncate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackboneFamily {
    /// `ResNet` encoders.
    Residual,
    /// `VGG` / `AlexNet` feature stacks.
    PlainConv,
    /// Compact convolutional transformer.
    CompactTransformer,
    /// Vision transformer.
    VisionTransformer,
    /// Endoscopy video transformer.
    EndoFm,
}

/// Parsed backbone identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackboneKind {
    /// ``resnet{18,50,101}conv{4,5}``.
    ResNet {
        /// Depth variant.
        depth: ResNetDepth,
        /// Last kept stage.
        stage: ResNetStage,
    },
    /// ``vgg16``.
    Vgg16,
    /// ``alexnet``.
    AlexNet,
    /// ``cct384*``.
    Cct384,
    /// ``vit*``.
    Vit,
    /// ``endofm*``.
    EndoFm,
}

impl BackboneKind {
    /// Parse a backbone identifier.
    pub fn parse(name: &str) -> crate::errors::Result<Self> {
        if let Some(rest) = name.strip_prefix("resnet") {
            let (depth, stage) = rest.split_once("conv").ok_or_else(|| {
                Error::config(format!(
                    "resnet backbone {name:?} must end with \"conv4\" or \"conv5\""
                ))
            })?;
            let depth = match depth {
                "18" => ResNetDepth::R18,
                "50" => ResNetDepth::R50,
                "101" => ResNetDepth::R101,
                _ => return Err(Error::config(format!("unknown resnet depth in {name:?}"))),
            };
            let stage = match stage {
                "4" => ResNetStage::Conv4,
                "5" => ResNetStage::Conv5,
                _ => return Err(Error::config(format!("unknown resnet stage in {name:?}"))),
            };
            return Ok(Self::ResNet { depth, stage });
        }
        match name {
            "vgg16" => Ok(Self::Vgg16),
            "alexnet" => Ok(Self::AlexNet),
            n if n.starts_with("cct384") => Ok(Self::Cct384),
            n if n.starts_with("vit") => Ok(Self::Vit),
            n if n.starts_with("endofm") => Ok(Self::EndoFm),
            _ => Err(Error::config(format!("unknown backbone: {name:?}"))),
        }
    }

    /// The family this backbone belongs to.
    pub fn family(&self) -> BackboneFamily {
        match self {
            Self::ResNet { .. } => BackboneFamily::Residual,
            Self::Vgg16 | Self::AlexNet => BackboneFamily::PlainConv,
            Self::Cct384 => BackboneFamily::CompactTransformer,
            Self::Vit => BackboneFamily::VisionTransformer,
            Self::EndoFm => BackboneFamily::EndoFm,
        }
    }

    /// Transformer backbones emit token sequences.
    pub fn works_with_tokens(&self) -> bool {
        matches!(
            self.family(),
            BackboneFamily::CompactTransformer
                | BackboneFamily::VisionTransformer
                | BackboneFamily::EndoFm
        )
    }

    /// The pretrain source actually loaded when `requested` is configured.
    ///
    /// Compact and hub transformers always start from their published
    /// `ImageNet` weights; `none` selects those too.
    pub fn effective_pretrain(
        &self,
        requested: PretrainSource,
    ) -> PretrainSource {
        match (self.family(), requested) {
            (
                BackboneFamily::CompactTransformer | BackboneFamily::VisionTransformer,
                PretrainSource::None,
            ) => PretrainSource::ImageNet,
            _ => requested,
        }
    }

    /// Architecture name used to key pretrained weights.
    pub fn arch_name(&self) -> &'static str {
        match self {
            Self::ResNet { depth, .. } => depth.arch_name(),
            Self::Vgg16 => "vgg16",
            Self::AlexNet => "alexnet",
            Self::Cct384 => "cct384",
            Self::Vit => "vit",
            Self::EndoFm => "endofm",
        }
    }

    /// The shape of the features this backbone feeds to `aggregation`.
    pub fn feature_shape(
        &self,
        aggregation: AggregationKind,
    ) -> FeatureShape {
        use AggregationKind as A;
        match self.family() {
            BackboneFamily::Residual | BackboneFamily::PlainConv => FeatureShape::Map,
            BackboneFamily::CompactTransformer => match aggregation {
                A::Cls | A::SeqPool => FeatureShape::Vector,
                _ => FeatureShape::Tokens,
            },
            BackboneFamily::VisionTransformer => match aggregation {
                A::NetVlad | A::Gem => FeatureShape::Tokens,
                _ => FeatureShape::Vector,
            },
            BackboneFamily::EndoFm => FeatureShape::Tokens,
        }
    }

    /// Whether the encoder emits a global (class token) descriptor.
    pub fn has_global_descriptor(&self) -> bool {
        self.works_with_tokens()
    }
}

/// Source of pretrained weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PretrainSource {
    /// Random initialization.
    None,
    /// `ImageNet` (torchvision / published checkpoints / transformer hub).
    ImageNet,
    /// Places 365.
    Places,
    /// Google Landmarks v2.
    Gldv2,
}

impl PretrainSource {
    /// Parse a pretrain source.
    pub fn parse(name: &str) -> crate::errors::Result<Self> {
        match name {
            "none" => Ok(Self::None),
            "imagenet" => Ok(Self::ImageNet),
            "places" => Ok(Self::Places),
            "gldv2" => Ok(Self::Gldv2),
            _ => Err(Error::config(format!("unknown pretrain source: {name:?}"))),
        }
    }

    /// Source name, as used in cache file names.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ImageNet => "imagenet",
            Self::Places => "places",
            Self::Gldv2 => "gldv2",
        }
    }

    /// Width of the classifier head the source checkpoints were trained with.
    pub fn num_classes(&self) -> usize {
        match self {
            Self::None | Self::ImageNet => 1000,
            Self::Places => 365,
            Self::Gldv2 => 512,
        }
    }
}

impl fmt::Display for PretrainSource {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed aggregation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    /// Generalized-mean pooling.
    Gem,
    /// Sum-pooling.
    Spoc,
    /// Max-pooling.
    Mac,
    /// Regional max-pooling.
    Rmac,
    /// Cluster-based (`NetVLAD`) pooling.
    NetVlad,
    /// Clustering plus context re-weighting.
    Crn,
    /// Residual re-ranking module.
    Rrm,
    /// Class-token shortcut.
    Cls,
    /// Sequence pooling (emitted by the encoder itself).
    SeqPool,
}

impl AggregationKind {
    /// All identifiers, in dispatch order.
    pub const ALL: [AggregationKind; 9] = [
        Self::Gem,
        Self::Spoc,
        Self::Mac,
        Self::Rmac,
        Self::NetVlad,
        Self::Crn,
        Self::Rrm,
        Self::Cls,
        Self::SeqPool,
    ];

    /// Lookup an identifier; unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// The identifier.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gem => "gem",
            Self::Spoc => "spoc",
            Self::Mac => "mac",
            Self::Rmac => "rmac",
            Self::NetVlad => "netvlad",
            Self::Crn => "crn",
            Self::Rrm => "rrm",
            Self::Cls => "cls",
            Self::SeqPool => "seqpool",
        }
    }

    /// The four pooling kinds composed with L2 placement and flatten.
    pub fn is_pooling(&self) -> bool {
        matches!(self, Self::Gem | Self::Spoc | Self::Mac | Self::Rmac)
    }

    /// Cluster-based kinds emit ``dim * clusters`` features.
    pub fn is_cluster_based(&self) -> bool {
        matches!(self, Self::NetVlad | Self::Crn)
    }

    /// Whether this aggregation can consume features of `shape`.
    pub fn accepts(
        &self,
        shape: FeatureShape,
    ) -> bool {
        match shape {
            FeatureShape::Map => !matches!(self, Self::Cls | Self::SeqPool),
            FeatureShape::Tokens => self.is_pooling() || matches!(self, Self::NetVlad),
            FeatureShape::Vector => matches!(self, Self::Cls | Self::SeqPool),
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where L2 normalization sits relative to a pooling aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2Placement {
    /// No normalization.
    None,
    /// Normalize the feature map before pooling.
    BeforePool,
    /// Normalize the pooled vector.
    AfterPool,
}

impl L2Placement {
    /// Parse an L2 placement.
    pub fn parse(name: &str) -> crate::errors::Result<Self> {
        match name {
            "none" => Ok(Self::None),
            "before_pool" => Ok(Self::BeforePool),
            "after_pool" => Ok(Self::AfterPool),
            _ => Err(Error::config(format!("unknown l2 placement: {name:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GeoLocalizationConfig::new();
        assert_eq!(config.backbone, "resnet18conv4");
        assert_eq!(config.aggregation, "netvlad");
        assert_eq!(config.resize, [480, 640]);
        assert_eq!(config.netvlad_clusters, 64);
        assert_eq!(config.fc_output_dim, None);
        assert!(!config.use_mlp);

        let config = config
            .with_backbone("vit".to_string())
            .with_fc_output_dim(Some(256));
        assert_eq!(config.backbone_kind().unwrap(), BackboneKind::Vit);
        assert_eq!(config.fc_output_dim, Some(256));
    }

    #[test]
    fn test_parse_backbones() {
        assert_eq!(
            BackboneKind::parse("resnet50conv5").unwrap(),
            BackboneKind::ResNet {
                depth: ResNetDepth::R50,
                stage: ResNetStage::Conv5
            }
        );
        assert_eq!(
            BackboneKind::parse("resnet101conv4").unwrap(),
            BackboneKind::ResNet {
                depth: ResNetDepth::R101,
                stage: ResNetStage::Conv4
            }
        );
        assert_eq!(BackboneKind::parse("cct384").unwrap(), BackboneKind::Cct384);
        assert_eq!(BackboneKind::parse("endofm").unwrap(), BackboneKind::EndoFm);
        assert_eq!(BackboneKind::parse("alexnet").unwrap(), BackboneKind::AlexNet);

        for bad in ["resnet18", "resnet34conv4", "resnet18conv3", "vgg19", "swin", ""] {
            assert!(
                matches!(BackboneKind::parse(bad), Err(Error::Configuration(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_backbone_families() {
        assert!(!BackboneKind::Vgg16.works_with_tokens());
        assert!(BackboneKind::Vit.works_with_tokens());
        assert!(BackboneKind::Cct384.works_with_tokens());
        assert_eq!(BackboneKind::AlexNet.family(), BackboneFamily::PlainConv);

        assert_eq!(
            BackboneKind::Vit.feature_shape(AggregationKind::Gem),
            FeatureShape::Tokens
        );
        assert_eq!(
            BackboneKind::Vit.feature_shape(AggregationKind::Spoc),
            FeatureShape::Vector
        );
        assert_eq!(
            BackboneKind::Cct384.feature_shape(AggregationKind::SeqPool),
            FeatureShape::Vector
        );
        assert_eq!(
            BackboneKind::Vgg16.feature_shape(AggregationKind::Cls),
            FeatureShape::Map
        );
    }

    #[test]
    fn test_aggregation_names() {
        for kind in AggregationKind::ALL {
            assert_eq!(AggregationKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(AggregationKind::from_name("vlad"), None);

        assert!(AggregationKind::Gem.is_pooling());
        assert!(!AggregationKind::NetVlad.is_pooling());
        assert!(AggregationKind::Crn.is_cluster_based());

        assert!(AggregationKind::Crn.accepts(FeatureShape::Map));
        assert!(!AggregationKind::Crn.accepts(FeatureShape::Tokens));
        assert!(AggregationKind::NetVlad.accepts(FeatureShape::Tokens));
        assert!(!AggregationKind::Cls.accepts(FeatureShape::Map));
        assert!(AggregationKind::SeqPool.accepts(FeatureShape::Vector));
    }

    #[test]
    fn test_pretrain_and_l2() {
        assert_eq!(PretrainSource::parse("places").unwrap().num_classes(), 365);
        assert_eq!(
            BackboneKind::Vit.effective_pretrain(PretrainSource::None),
            PretrainSource::ImageNet
        );
        assert_eq!(
            BackboneKind::Cct384.effective_pretrain(PretrainSource::None),
            PretrainSource::ImageNet
        );
        assert_eq!(
            BackboneKind::Cct384.effective_pretrain(PretrainSource::Gldv2),
            PretrainSource::Gldv2
        );
        assert_eq!(
            BackboneKind::EndoFm.effective_pretrain(PretrainSource::None),
            PretrainSource::None
        );
        assert_eq!(
            BackboneKind::AlexNet.effective_pretrain(PretrainSource::None),
            PretrainSource::None
        );
        assert_eq!(PretrainSource::parse("gldv2").unwrap().num_classes(), 512);
        assert!(PretrainSource::parse("instagram").is_err());

        assert_eq!(L2Placement::parse("after_pool").unwrap(), L2Placement::AfterPool);
        assert!(L2Placement::parse("sometimes").is_err());
    }
}
