//! # Geo-Localization Network
//!
//! [`GeoLocalizationNet`] wires an assembled [`Backbone`] to an
//! [`AggregationChain`] and an optional [`FeatureComparer`].
//!
//! Assembly order:
//! 1. parse and cross-check the configuration;
//! 2. [`build_backbone_with`], which reports the encoder's real output
//!    dimension;
//! 3. [`build_aggregation`] over that dimension;
//! 4. the optional projection, then the optional comparer sized to the
//!    reported embedding dimension.

use crate::aggregation::{AggregationChain, build_aggregation};
use crate::backbone::freeze::TrainabilityMap;
use crate::backbone::{Backbone, EncoderLayouts, WeightSources, build_backbone_with};
use crate::cache::disk::DiskCacheConfig;
use crate::cache::hub::HubCache;
use crate::cache::weights::WeightCache;
use crate::comparer::{FeatureComparer, FeatureComparerConfig, similarity};
use crate::config::{AggregationKind, BackboneKind, GeoLocalizationConfig};
use crate::errors::{Error, Result};
use crate::layers::norm::l2_normalize;
use burn::module::{Ignored, Module};
use burn::nn::LinearConfig;
use burn::prelude::{Backend, Tensor};

/// Per-call input; selects the forward mode.
#[derive(Debug, Clone)]
pub enum NetInput<B: Backend> {
    /// Embed a batch of images, ``[batch, 3, height, width]``.
    Images(Tensor<B, 4>),

    /// Score pair representations, ``[batch, embedding_dim]``.
    Pairs {
        /// The pair representations.
        features: Tensor<B, 2>,
        /// Return the "similar" probability instead of the logits.
        softmax: bool,
    },
}

/// Per-call output.
#[derive(Debug, Clone)]
pub enum NetOutput<B: Backend> {
    /// Image embeddings, ``[batch, embedding_dim]``.
    Embeddings(Tensor<B, 2>),
    /// Comparer logits, ``[batch, 2]``.
    Logits(Tensor<B, 2>),
    /// "Similar" probabilities, ``[batch]``.
    Similarity(Tensor<B, 1>),
}

/// An assembled place-recognition network.
#[derive(Module, Debug)]
pub struct GeoLocalizationNet<B: Backend> {
    /// The encoder.
    pub backbone: Backbone<B>,

    /// Pooling, normalization and projection.
    pub aggregation: AggregationChain<B>,

    /// Optional pairwise comparer.
    pub comparer: Option<FeatureComparer<B>>,

    /// The embedding dimension.
    pub features_dim: usize,

    /// The configured aggregation.
    pub kind: Ignored<AggregationKind>,

    /// The encoder's per-unit trainability.
    pub trainability: Ignored<TrainabilityMap>,
}

impl<B: Backend> GeoLocalizationNet<B> {
    /// Assemble the configured network.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for unknown or incompatible options; any
    /// error of [`build_backbone`](crate::backbone::build_backbone).
    pub fn build(
        config: &GeoLocalizationConfig,
        sources: WeightSources<'_>,
        device: &B::Device,
    ) -> Result<Self> {
        Self::build_with(config, sources, &EncoderLayouts::default(), device)
    }

    /// Assemble the configured network over explicit encoder layouts.
    ///
    /// # Errors
    ///
    /// See [`GeoLocalizationNet::build`].
    #[tracing::instrument(
        skip_all,
        fields(backbone = %config.backbone, aggregation = %config.aggregation)
    )]
    pub fn build_with(
        config: &GeoLocalizationConfig,
        sources: WeightSources<'_>,
        layouts: &EncoderLayouts,
        device: &B::Device,
    ) -> Result<Self> {
        let kind = config.aggregation_kind()?;
        let l2 = config.l2_placement()?;
        validate_pairing(config.backbone_kind()?, kind)?;
        if kind == AggregationKind::Cls && config.fc_output_dim.is_some() {
            return Err(Error::config(
                "cls aggregation returns the class token; fc_output_dim cannot apply",
            ));
        }

        let built = build_backbone_with::<B>(config, sources, layouts, device)?;

        let aggregation = build_aggregation(
            &config.aggregation,
            built.features_dim,
            config.netvlad_clusters,
            built.work_with_tokens,
            device,
        )
        .ok_or_else(|| {
            Error::config(format!("unknown aggregation: {:?}", config.aggregation))
        })?;

        let aggregated_dim = aggregation.output_dim(built.features_dim);
        let (projection, features_dim) = match config.fc_output_dim {
            Some(dim) => (Some(LinearConfig::new(aggregated_dim, dim).init(device)), dim),
            None => (None, aggregated_dim),
        };

        let comparer = config
            .use_mlp
            .then(|| FeatureComparerConfig::new(features_dim).init(device));

        tracing::info!(
            backbone_dim = built.features_dim,
            features_dim,
            projected = projection.is_some(),
            comparer = comparer.is_some(),
            "assembled network"
        );

        Ok(Self {
            backbone: built.backbone,
            aggregation: AggregationChain::new(aggregation, kind, l2, projection),
            comparer,
            features_dim,
            kind: Ignored(kind),
            trainability: Ignored(built.trainability),
        })
    }

    /// Assemble with disk-cached weights under ``config.weights_root``.
    ///
    /// # Errors
    ///
    /// See [`GeoLocalizationNet::build`].
    pub fn from_config(
        config: &GeoLocalizationConfig,
        device: &B::Device,
    ) -> Result<Self> {
        let disk = DiskCacheConfig::rooted(config.weights_root.clone());
        let checkpoints = WeightCache::new(disk.clone());
        let hub = HubCache::new(disk);
        Self::build(
            config,
            WeightSources {
                checkpoints: &checkpoints,
                hub: &hub,
            },
            device,
        )
    }

    /// The embedding dimension.
    pub fn embedding_dim(&self) -> usize {
        self.features_dim
    }

    /// The configured aggregation.
    pub fn aggregation_kind(&self) -> AggregationKind {
        *self.kind
    }

    /// The encoder's per-unit trainability.
    pub fn trainability(&self) -> &TrainabilityMap {
        &self.trainability
    }

    /// Forward Pass.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for [`NetInput::Pairs`] on a network
    /// without a comparer.
    pub fn forward(
        &self,
        input: NetInput<B>,
    ) -> Result<NetOutput<B>> {
        match input {
            NetInput::Images(images) => Ok(NetOutput::Embeddings(self.forward_embedding(images))),
            NetInput::Pairs { features, softmax } => {
                let logits = self.forward_compare(features)?;
                Ok(if softmax {
                    NetOutput::Similarity(similarity(logits))
                } else {
                    NetOutput::Logits(logits)
                })
            }
        }
    }

    /// ``[batch, 3, height, width] -> [batch, embedding_dim]``
    ///
    /// `cls` returns the L2-normalized global descriptor and skips the
    /// aggregation chain.
    pub fn forward_embedding(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let output = self.backbone.forward(images);
        if *self.kind == AggregationKind::Cls {
            return match output.global {
                Some(global) => l2_normalize(global, 1),
                // `validate_pairing` only admits cls on encoders with a class token.
                None => unreachable!("cls aggregation on an encoder without a class token"),
            };
        }
        self.aggregation.forward(output.features)
    }

    /// ``[batch, embedding_dim] -> [batch, 2]`` comparer logits.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if no comparer is attached.
    pub fn forward_compare(
        &self,
        features: Tensor<B, 2>,
    ) -> Result<Tensor<B, 2>> {
        match &self.comparer {
            Some(comparer) => Ok(comparer.forward(features)),
            None => Err(Error::config("comparison requested, but use_mlp is not set")),
        }
    }
}

/// Check that `aggregation` can consume the features `backbone` emits.
pub fn validate_pairing(
    backbone: BackboneKind,
    aggregation: AggregationKind,
) -> Result<()> {
    if aggregation == AggregationKind::Cls {
        if !backbone.has_global_descriptor() {
            return Err(Error::config(format!(
                "{backbone:?} has no class token for cls aggregation"
            )));
        }
        return Ok(());
    }
    let shape = backbone.feature_shape(aggregation);
    if !aggregation.accepts(shape) {
        return Err(Error::config(format!(
            "{aggregation} cannot aggregate {shape:?} features of {backbone:?}"
        )));
    }
    Ok(())
}
