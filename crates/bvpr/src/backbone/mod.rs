//! # Backbone Assembly
//!
//! [`build_backbone`] turns a [`GeoLocalizationConfig`] into a [`Backbone`]:
//! it instantiates the family's architecture, loads pretrained weights,
//! truncates, applies the family's freeze policy, and determines the
//! encoder's output dimension.
//!
//! | family              | truncation            | freeze policy                         |
//! |---------------------|-----------------------|---------------------------------------|
//! | residual            | ``conv4`` / ``conv5`` | children before ``resnet_layer``      |
//! | plain conv          | last 2 layers         | ``alexnet`` 5 leading; ``vgg16`` all but 5 |
//! | compact transformer | ``trunc_te`` blocks   | all but blocks ``> freeze_te``        |
//! | vision transformer  | ``trunc_te`` layers   | all but layers ``> freeze_te``        |
//! | `EndoFM`            | none                  | all but the last ``trainable_vit_blocks`` |

pub mod freeze;
pub mod loading;
pub mod probe;

use crate::backbone::freeze::{FreezePolicy, ParamUnit, ParamUnits, TrainabilityMap};
use crate::backbone::loading::{load_checkpoint, owned_remaps, verify_units};
use crate::cache::hub::TransformerHub;
use crate::cache::weights::CheckpointSource;
use crate::config::{
    AggregationKind, BackboneFamily, BackboneKind, GeoLocalizationConfig, PretrainSource,
};
use crate::errors::{Error, Result};
use crate::features::{EncoderOutput, Features};
use crate::models::cct::{self, CctConfig, CompactTransformer};
use crate::models::endofm::{self, EndoFm, EndoFmConfig};
use crate::models::plain::{PlainConvConfig, PlainConvNet};
use crate::models::resnet::pretrained;
use crate::models::resnet::resnet_model::{RESNET_CHILDREN, ResNetConfig, ResNetTrunk};
use crate::models::vit::{self, TokenSelection, VitConfig, VitWrapper};
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use std::path::{Path, PathBuf};

/// Resolutions the transformer-hub and `EndoFM` checkpoints support.
pub const TRANSFORMER_RESOLUTIONS: [usize; 2] = [224, 384];

/// Number of trailing layers a plain stack loses.
pub const PLAIN_TRUNCATED_LAYERS: usize = 2;

/// Layouts of the transformer encoders.
///
/// [`Default`] holds the published architectures the hub and checkpoint
/// weights are trained for; ViT's `image_size` is set from the configured
/// resolution.
#[derive(Debug, Clone)]
pub struct EncoderLayouts {
    /// Compact transformer layout.
    pub cct: CctConfig,
    /// Vision transformer layout.
    pub vit: VitConfig,
    /// `EndoFM` layout.
    pub endofm: EndoFmConfig,
}

impl Default for EncoderLayouts {
    fn default() -> Self {
        Self {
            cct: CctConfig::cct_14_7x2_384(),
            vit: VitConfig::base_patch16(224),
            endofm: EndoFmConfig::new(),
        }
    }
}

/// A feature encoder.
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    /// Truncated `ResNet`.
    ResNet(ResNetTrunk<B>),
    /// `VGG-16` / `AlexNet` features.
    Plain(PlainConvNet<B>),
    /// Compact convolutional transformer.
    Cct(CompactTransformer<B>),
    /// Vision transformer.
    Vit(VitWrapper<B>),
    /// `EndoFM`.
    EndoFm(EndoFm<B>),
}

impl<B: Backend> Backbone<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> EncoderOutput<B> {
        match self {
            Self::ResNet(m) => Features::Map(m.forward(input)).into(),
            Self::Plain(m) => Features::Map(m.forward(input)).into(),
            Self::Cct(m) => m.forward(input),
            Self::Vit(m) => m.forward(input),
            Self::EndoFm(m) => m.forward(input),
        }
    }
}

impl<B: Backend> ParamUnits for Backbone<B> {
    fn param_units(&self) -> Vec<ParamUnit> {
        match self {
            Self::ResNet(m) => m.param_units(),
            Self::Plain(m) => m.param_units(),
            Self::Cct(m) => m.param_units(),
            Self::Vit(m) => m.param_units(),
            Self::EndoFm(m) => m.param_units(),
        }
    }

    fn apply_trainability(
        self,
        map: &TrainabilityMap,
    ) -> Self {
        match self {
            Self::ResNet(m) => Self::ResNet(m.apply_trainability(map)),
            Self::Plain(m) => Self::Plain(m.apply_trainability(map)),
            Self::Cct(m) => Self::Cct(m.apply_trainability(map)),
            Self::Vit(m) => Self::Vit(m.apply_trainability(map)),
            Self::EndoFm(m) => Self::EndoFm(m.apply_trainability(map)),
        }
    }
}

/// Weight retrieval collaborators.
#[derive(Clone, Copy)]
pub struct WeightSources<'a> {
    /// ``(arch, source)`` checkpoints.
    pub checkpoints: &'a dyn CheckpointSource,
    /// Named transformer checkpoints.
    pub hub: &'a dyn TransformerHub,
}

/// An assembled backbone, and what assembly learned about it.
#[derive(Debug)]
pub struct BuiltBackbone<B: Backend> {
    /// The encoder.
    pub backbone: Backbone<B>,
    /// The parsed identifier.
    pub kind: BackboneKind,
    /// Channel / embedding dimension of the encoder features.
    pub features_dim: usize,
    /// Whether the encoder emits token sequences.
    pub work_with_tokens: bool,
    /// The applied per-unit trainability.
    pub trainability: TrainabilityMap,
    /// The checkpoint weights were loaded from, if any.
    pub checkpoint: Option<PathBuf>,
}

/// Assemble the configured backbone with the published encoder layouts.
///
/// See [`build_backbone_with`].
pub fn build_backbone<B: Backend>(
    config: &GeoLocalizationConfig,
    sources: WeightSources<'_>,
    device: &B::Device,
) -> Result<BuiltBackbone<B>> {
    build_backbone_with(config, sources, &EncoderLayouts::default(), device)
}

/// Assemble the configured backbone.
///
/// # Errors
///
/// - [`Error::Configuration`] for unknown identifiers, unsupported
///   pretrain sources or resolutions, and invalid freeze/truncation depths.
/// - [`Error::Retrieval`] / [`Error::WeightLoad`] when weights cannot be
///   fetched or do not match the architecture.
/// - [`Error::ShapeInference`] when the output dimension cannot be probed.
#[tracing::instrument(
    skip_all,
    fields(backbone = %config.backbone, pretrain = %config.pretrain)
)]
pub fn build_backbone_with<B: Backend>(
    config: &GeoLocalizationConfig,
    sources: WeightSources<'_>,
    layouts: &EncoderLayouts,
    device: &B::Device,
) -> Result<BuiltBackbone<B>> {
    let kind = config.backbone_kind()?;
    let source = kind.effective_pretrain(config.pretrain_source()?);
    let aggregation = config.aggregation_kind()?;
    if matches!(
        kind.family(),
        BackboneFamily::VisionTransformer | BackboneFamily::EndoFm
    ) {
        validate_transformer_resolution(config)?;
    }

    let checkpoint = resolve_checkpoint(config, kind, source, sources)?;
    let path = checkpoint.as_deref();

    let (backbone, policy, declared_dim) = match kind {
        BackboneKind::ResNet { depth, stage } => {
            if !RESNET_CHILDREN.contains(&config.resnet_layer.as_str()) {
                return Err(Error::config(format!(
                    "unknown resnet layer {:?}; expected one of {RESNET_CHILDREN:?}",
                    config.resnet_layer
                )));
            }
            let model = ResNetConfig::for_depth(depth)
                .with_num_classes(source.num_classes())
                .init::<B>(device);
            let trunk = load_verified(
                model,
                path,
                &owned_remaps(pretrained::PYTORCH_KEY_REMAPS),
                device,
                |m| m.into_trunk(stage),
            )?;
            tracing::debug!(
                ?stage,
                boundary = %config.resnet_layer,
                "truncated resnet; freezing children before the boundary"
            );
            (
                Backbone::ResNet(trunk),
                FreezePolicy::BeforeUnit(config.resnet_layer.clone()),
                None,
            )
        }
        BackboneKind::Vgg16 | BackboneKind::AlexNet => {
            let full = match kind {
                BackboneKind::AlexNet => PlainConvConfig::alexnet(),
                _ => PlainConvConfig::vgg16(),
            };
            let layout = full.clone().truncated(PLAIN_TRUNCATED_LAYERS);
            let net = load_verified(
                full.init_features::<B>(device),
                path,
                &full.pytorch_key_remaps(),
                device,
                |f| f.into_net(&layout),
            )?;
            let leading = match kind {
                BackboneKind::AlexNet => 5,
                _ => net.len().saturating_sub(5),
            };
            tracing::debug!(layers = net.len(), frozen = leading, "truncated plain conv stack");
            (Backbone::Plain(net), FreezePolicy::Leading(leading), None)
        }
        BackboneKind::Cct384 => {
            let cfg = layouts.cct.clone().with_num_classes(source.num_classes());
            let pooled = matches!(aggregation, AggregationKind::Cls | AggregationKind::SeqPool);
            let encoder = load_verified(
                cfg.init::<B>(device),
                path,
                &owned_remaps(cct::PYTORCH_KEY_REMAPS),
                device,
                |m| m.into_encoder(&cfg, pooled),
            )?;
            let encoder = match config.trunc_te {
                Some(depth) => {
                    validate_truncation(depth, encoder.num_blocks())?;
                    tracing::debug!(depth, "truncate cct to the first blocks");
                    encoder.truncated(depth)
                }
                None => encoder,
            };
            let dim = encoder.embed_dim();
            (
                Backbone::Cct(encoder),
                transformer_freeze_policy(config.freeze_te),
                Some(dim),
            )
        }
        BackboneKind::Vit => {
            let layout = layouts.vit.clone().with_image_size(config.resize[0]);
            let vit = load_verified(
                layout.init::<B>(device),
                path,
                &owned_remaps(vit::PYTORCH_KEY_REMAPS),
                device,
                |m| m,
            )?;
            let vit = match config.trunc_te {
                Some(depth) => {
                    validate_truncation(depth, vit.num_layers())?;
                    tracing::debug!(depth, "truncate vit to the first encoder layers");
                    vit.truncated(depth)
                }
                None => vit,
            };
            if let Some(f) = config.freeze_te {
                tracing::info!("freeze {} vit encoders", f + 1);
            }
            let selection = match aggregation {
                AggregationKind::NetVlad | AggregationKind::Gem => TokenSelection::PatchTokens,
                _ => TokenSelection::ClassToken,
            };
            let dim = vit.hidden_size();
            (
                Backbone::Vit(VitWrapper::new(vit, selection)),
                transformer_freeze_policy(config.freeze_te),
                Some(dim),
            )
        }
        BackboneKind::EndoFm => {
            let model = load_verified(
                layouts.endofm.init::<B>(device),
                path,
                &owned_remaps(endofm::PYTORCH_KEY_REMAPS),
                device,
                |m| m,
            )?;
            let dim = model.embed_dim();
            (
                Backbone::EndoFm(model),
                FreezePolicy::TrailingBlocks(config.trainable_vit_blocks),
                Some(dim),
            )
        }
    };

    let trainability = policy.resolve(backbone.param_units())?;
    let backbone = backbone.apply_trainability(&trainability);

    let features_dim = match declared_dim {
        Some(dim) => dim,
        None => probe::infer_output_channels(&backbone, device)?,
    };

    tracing::info!(
        features_dim,
        trainable = trainability.trainable_params(),
        frozen = trainability.frozen_params(),
        "assembled backbone"
    );

    Ok(BuiltBackbone {
        backbone,
        kind,
        features_dim,
        work_with_tokens: kind.works_with_tokens(),
        trainability,
        checkpoint,
    })
}

/// Find the checkpoint to load, if any.
///
/// An explicit `checkpoint` path wins; otherwise the family decides which
/// pretrain sources exist and which collaborator serves them. Transformer
/// families without one resolve their `ImageNet` weights; see
/// [`BackboneKind::effective_pretrain`].
pub fn resolve_checkpoint(
    config: &GeoLocalizationConfig,
    kind: BackboneKind,
    source: PretrainSource,
    sources: WeightSources<'_>,
) -> Result<Option<PathBuf>> {
    if let Some(path) = &config.checkpoint {
        return Ok(Some(PathBuf::from(path)));
    }
    let source = kind.effective_pretrain(source);
    if source == PretrainSource::None {
        return Ok(None);
    }

    let unsupported = || {
        Error::config(format!(
            "backbone {:?} has no {source} weights",
            config.backbone
        ))
    };
    let path = match kind.family() {
        BackboneFamily::Residual | BackboneFamily::PlainConv => {
            if kind == BackboneKind::AlexNet && source != PretrainSource::ImageNet {
                return Err(unsupported());
            }
            sources.checkpoints.fetch(kind.arch_name(), source)?
        }
        BackboneFamily::CompactTransformer => {
            if source != PretrainSource::ImageNet {
                return Err(unsupported());
            }
            sources.checkpoints.fetch(kind.arch_name(), source)?
        }
        BackboneFamily::VisionTransformer => {
            let name = vit::hub_model_name(config.resize[0])
                .filter(|_| source == PretrainSource::ImageNet)
                .ok_or_else(unsupported)?;
            sources.hub.resolve(name)?
        }
        BackboneFamily::EndoFm => {
            return Err(Error::config(
                "endofm weights are only loaded from an explicit checkpoint",
            ));
        }
    };
    Ok(Some(path))
}

/// Load `path` (if any) into `model`, then convert it into an encoder.
///
/// The loaded encoder's units must match those of the random-init one.
fn load_verified<B, M, E, F>(
    model: M,
    path: Option<&Path>,
    remaps: &[(String, String)],
    device: &B::Device,
    into_encoder: F,
) -> Result<E>
where
    B: Backend,
    M: Module<B>,
    E: ParamUnits,
    F: Fn(M) -> E,
{
    let Some(path) = path else {
        return Ok(into_encoder(model));
    };
    let expected = into_encoder(model.clone()).param_units();
    let encoder = into_encoder(load_checkpoint(model, path, remaps, device)?);
    verify_units(path, &expected, &encoder.param_units())?;
    Ok(encoder)
}

fn validate_truncation(
    depth: usize,
    num_blocks: usize,
) -> Result<()> {
    if depth == 0 || depth > num_blocks {
        return Err(Error::config(format!(
            "trunc_te must be in 1..={num_blocks}, got {depth}"
        )));
    }
    Ok(())
}

fn validate_transformer_resolution(config: &GeoLocalizationConfig) -> Result<usize> {
    let height = config.resize[0];
    if !TRANSFORMER_RESOLUTIONS.contains(&height) {
        return Err(Error::config(format!(
            "image size for {} must be either 224 or 384, but it's {height}",
            config.backbone
        )));
    }
    Ok(height)
}

fn transformer_freeze_policy(freeze_te: Option<usize>) -> FreezePolicy {
    match freeze_te {
        Some(f) => FreezePolicy::ReenableBlocksAfter(f),
        None => FreezePolicy::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::disk::DiskCacheConfig;
    use crate::cache::hub::HubCache;
    use crate::backbone::loading::save_checkpoint;
    use crate::cache::weights::WeightCache;
    use crate::features::FeatureShape;
    use crate::models::vit::Vit;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    struct Offline;

    impl CheckpointSource for Offline {
        fn fetch(
            &self,
            arch: &str,
            source: PretrainSource,
        ) -> anyhow::Result<PathBuf> {
            anyhow::bail!("offline: {arch} {source}")
        }
    }

    impl TransformerHub for Offline {
        fn resolve(
            &self,
            model_name: &str,
        ) -> anyhow::Result<PathBuf> {
            anyhow::bail!("offline: {model_name}")
        }
    }

    fn offline() -> WeightSources<'static> {
        WeightSources {
            checkpoints: &Offline,
            hub: &Offline,
        }
    }

    /// Serves one checkpoint for every request.
    struct Served(PathBuf);

    impl CheckpointSource for Served {
        fn fetch(
            &self,
            _arch: &str,
            _source: PretrainSource,
        ) -> anyhow::Result<PathBuf> {
            Ok(self.0.clone())
        }
    }

    impl TransformerHub for Served {
        fn resolve(
            &self,
            _model_name: &str,
        ) -> anyhow::Result<PathBuf> {
            Ok(self.0.clone())
        }
    }

    fn small_layouts() -> EncoderLayouts {
        EncoderLayouts {
            cct: CctConfig::new()
                .with_embed_dim(16)
                .with_num_layers(3)
                .with_num_heads(2)
                .with_in_planes(8)
                .with_img_size(64),
            vit: VitConfig::new()
                .with_hidden_size(24)
                .with_num_layers(3)
                .with_num_heads(2)
                .with_intermediate_size(48),
            endofm: EndoFmConfig::new().with_depth(1),
        }
    }

    #[test]
    fn test_resolve_checkpoint() {
        let config = GeoLocalizationConfig::new();
        let path = resolve_checkpoint(
            &config,
            BackboneKind::Vgg16,
            PretrainSource::None,
            offline(),
        )
        .unwrap();
        assert_eq!(path, None);

        let explicit = config.clone().with_checkpoint(Some("x.mpk".to_string()));
        let path =
            resolve_checkpoint(&explicit, BackboneKind::EndoFm, PretrainSource::Places, offline())
                .unwrap();
        assert_eq!(path, Some(PathBuf::from("x.mpk")));

        let result =
            resolve_checkpoint(&config, BackboneKind::AlexNet, PretrainSource::Places, offline());
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result =
            resolve_checkpoint(&config, BackboneKind::Cct384, PretrainSource::Gldv2, offline());
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result =
            resolve_checkpoint(&config, BackboneKind::EndoFm, PretrainSource::ImageNet, offline());
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result =
            resolve_checkpoint(&config, BackboneKind::Vgg16, PretrainSource::Gldv2, offline());
        assert!(matches!(result, Err(Error::Retrieval(_))));
    }

    #[test]
    fn test_transformers_resolve_imagenet_by_default() {
        let config = GeoLocalizationConfig::new().with_resize([224, 224]);
        for kind in [BackboneKind::Cct384, BackboneKind::Vit] {
            let result = resolve_checkpoint(&config, kind, PretrainSource::None, offline());
            assert!(matches!(result, Err(Error::Retrieval(_))), "{kind:?}");
        }

        let path =
            resolve_checkpoint(&config, BackboneKind::EndoFm, PretrainSource::None, offline())
                .unwrap();
        assert_eq!(path, None);

        let result =
            resolve_checkpoint(&config, BackboneKind::Vit, PretrainSource::Places, offline());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_resolve_cached_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskCacheConfig::rooted(dir.path().to_string_lossy());
        let cache = WeightCache::new(disk.clone());
        let hub = HubCache::new(disk);

        let local = cache.checkpoint_path("resnet18", PretrainSource::Places);
        std::fs::create_dir_all(local.parent().unwrap()).unwrap();
        std::fs::write(&local, b"").unwrap();

        let sources = WeightSources {
            checkpoints: &cache,
            hub: &hub,
        };
        let config = GeoLocalizationConfig::new();
        let path = resolve_checkpoint(
            &config,
            config.backbone_kind().unwrap(),
            PretrainSource::Places,
            sources,
        )
        .unwrap();
        assert_eq!(path, Some(local));
    }

    #[test]
    fn test_validation() {
        assert!(validate_truncation(2, 14).is_ok());
        assert!(validate_truncation(14, 14).is_ok());
        assert!(validate_truncation(0, 14).is_err());
        assert!(validate_truncation(15, 14).is_err());

        let config = GeoLocalizationConfig::new().with_backbone("vit".to_string());
        assert!(validate_transformer_resolution(&config.clone().with_resize([224, 224])).is_ok());
        assert!(validate_transformer_resolution(&config.clone().with_resize([384, 384])).is_ok());
        assert!(matches!(
            validate_transformer_resolution(&config.with_resize([256, 256])),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_build_resnet18() {
        let device = Default::default();
        let config = GeoLocalizationConfig::new();

        let built = build_backbone::<B>(&config, offline(), &device).unwrap();
        assert_eq!(built.features_dim, 256);
        assert!(!built.work_with_tokens);
        assert_eq!(built.checkpoint, None);
        assert_eq!(
            built.trainability.frozen_names(),
            vec!["conv1", "bn1", "relu", "maxpool", "layer1", "layer2"]
        );

        let output = built.backbone.forward(Tensor::ones([1, 3, 64, 64], &device));
        assert_eq!(output.features.channels(), 256);
        assert!(output.global.is_none());
    }

    #[test]
    fn test_unknown_resnet_layer() {
        let device = Default::default();
        let config = GeoLocalizationConfig::new().with_resnet_layer("layer9".to_string());
        let result = build_backbone::<B>(&config, offline(), &device);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_unknown_backbone() {
        let device = Default::default();
        let config = GeoLocalizationConfig::new().with_backbone("resnet34conv4".to_string());
        let result = build_backbone::<B>(&config, offline(), &device);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_retrieval_failure() {
        let device = Default::default();
        let config = GeoLocalizationConfig::new().with_pretrain("imagenet".to_string());
        let result = build_backbone::<B>(&config, offline(), &device);
        assert!(matches!(result, Err(Error::Retrieval(_))));
    }

    #[test]
    fn test_build_cct_from_served_checkpoint() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let layouts = small_layouts();

        let reference = layouts.cct.clone().with_num_classes(1000).init::<B>(&device);
        save_checkpoint(reference, &dir.path().join("cct")).unwrap();
        let served = Served(dir.path().join("cct.mpk"));
        let sources = WeightSources {
            checkpoints: &served,
            hub: &served,
        };

        let config = GeoLocalizationConfig::new()
            .with_backbone("cct384".to_string())
            .with_aggregation("seqpool".to_string());
        let built = build_backbone_with::<B>(&config, sources, &layouts, &device).unwrap();
        assert_eq!(built.checkpoint, Some(dir.path().join("cct.mpk")));
        assert_eq!(built.features_dim, 16);

        let output = built.backbone.forward(Tensor::ones([1, 3, 64, 64], &device));
        assert_eq!(output.features.shape(), FeatureShape::Vector);
        assert_eq!(output.features.channels(), built.features_dim);
    }

    #[test]
    fn test_build_vit_token_selection() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let layouts = small_layouts();

        let reference: Vit<B> = layouts.vit.clone().with_image_size(224).init(&device);
        save_checkpoint(reference, &dir.path().join("vit")).unwrap();
        let served = Served(dir.path().join("vit.mpk"));
        let sources = WeightSources {
            checkpoints: &served,
            hub: &served,
        };

        let base = GeoLocalizationConfig::new()
            .with_backbone("vit".to_string())
            .with_resize([224, 224]);
        for (aggregation, shape) in [
            ("netvlad", FeatureShape::Tokens),
            ("gem", FeatureShape::Tokens),
            ("cls", FeatureShape::Vector),
        ] {
            let config = base.clone().with_aggregation(aggregation.to_string());
            let built = build_backbone_with::<B>(&config, sources, &layouts, &device).unwrap();
            assert_eq!(built.features_dim, 24, "{aggregation}");
            assert!(built.checkpoint.is_some());

            let output = built.backbone.forward(Tensor::ones([1, 3, 64, 64], &device));
            assert_eq!(output.features.shape(), shape, "{aggregation}");
            assert_eq!(output.features.channels(), built.features_dim);
            assert_eq!(output.global.unwrap().dims(), [1, 24]);
        }

        // A checkpoint of another layout is rejected.
        let wide = VitConfig::new()
            .with_hidden_size(24)
            .with_num_layers(4)
            .with_num_heads(2)
            .with_intermediate_size(48);
        let layouts = EncoderLayouts { vit: wide, ..layouts };
        let config = base.with_aggregation("cls".to_string());
        let result = build_backbone_with::<B>(&config, sources, &layouts, &device);
        assert!(matches!(result, Err(Error::WeightLoad { .. })));
    }

    #[test]
    fn test_build_endofm_declared_dimension() {
        let device = Default::default();
        let config = GeoLocalizationConfig::new()
            .with_backbone("endofm".to_string())
            .with_aggregation("gem".to_string())
            .with_resize([224, 224]);

        let built =
            build_backbone_with::<B>(&config, offline(), &small_layouts(), &device).unwrap();
        assert_eq!(built.features_dim, 768);
        assert!(built.work_with_tokens);

        let output = built.backbone.forward(Tensor::ones([1, 3, 64, 64], &device));
        assert_eq!(output.features.shape(), FeatureShape::Tokens);
        assert_eq!(output.features.channels(), built.features_dim);
    }
}
