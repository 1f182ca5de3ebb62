//! # Aggregation
//!
//! Reduces encoder features to a fixed-length descriptor.
//!
//! [`build_aggregation`] is a pure dispatch table from identifiers to
//! [`Aggregation`] layers; [`AggregationChain`] composes the layer with
//! optional L2 normalization, flattening, and an output projection.

pub mod gem;
pub mod netvlad;
pub mod pooling;
pub mod rrm;

use crate::aggregation::gem::{Gem, GemConfig};
use crate::aggregation::netvlad::{Crn, NetVlad, NetVladConfig};
use crate::aggregation::pooling::{Mac, Rmac, Spoc};
use crate::aggregation::rrm::{Rrm, RrmConfig};
use crate::config::{AggregationKind, L2Placement};
use crate::features::Features;
use crate::layers::flatten::Flatten;
use crate::layers::norm::{L2Norm, l2_normalize};
use burn::module::{Ignored, Module};
use burn::nn::Linear;
use burn::prelude::{Backend, Tensor};

/// Pass-through; the encoder already pooled.
#[derive(Module, Clone, Debug, Default)]
pub struct Identity;

/// An aggregation layer.
#[derive(Module, Debug)]
pub enum Aggregation<B: Backend> {
    /// Generalized-mean pooling.
    Gem(Gem<B>),
    /// Sum pooling.
    Spoc(Spoc),
    /// Max pooling.
    Mac(Mac),
    /// Regional max pooling.
    Rmac(Rmac),
    /// `NetVLAD`.
    NetVlad(NetVlad<B>),
    /// Contextual reweighting `NetVLAD`.
    Crn(Crn<B>),
    /// Residual retrieval module.
    Rrm(Rrm<B>),
    /// Pass-through.
    Identity(Identity),
}

/// View features as a spatial map; vectors cannot be.
fn spatial<B: Backend>(features: Features<B>) -> Tensor<B, 4> {
    let shape = features.shape();
    match features.into_map() {
        Some(map) => map,
        None => panic!("{shape:?} features cannot be aggregated spatially"),
    }
}

impl<B: Backend> Aggregation<B> {
    /// The width of the aggregated descriptor for `features_dim` inputs.
    pub fn output_dim(
        &self,
        features_dim: usize,
    ) -> usize {
        match self {
            Self::NetVlad(vlad) => features_dim * vlad.clusters(),
            Self::Crn(crn) => features_dim * crn.vlad.clusters(),
            _ => features_dim,
        }
    }

    /// Forward Pass.
    ///
    /// Poolings return ``[batch, dim, 1, 1]`` maps; cluster and residual
    /// aggregations return vectors; [`Identity`] returns its input.
    ///
    /// # Panics
    ///
    /// If spatial aggregation is applied to vector features.
    pub fn forward(
        &self,
        features: Features<B>,
    ) -> Features<B> {
        match self {
            Self::Gem(m) => Features::Map(m.forward(spatial(features))),
            Self::Spoc(m) => Features::Map(m.forward(spatial(features))),
            Self::Mac(m) => Features::Map(m.forward(spatial(features))),
            Self::Rmac(m) => Features::Map(m.forward(spatial(features))),
            Self::NetVlad(m) => Features::Vector(m.forward(spatial(features))),
            Self::Crn(m) => Features::Vector(m.forward(spatial(features))),
            Self::Rrm(m) => Features::Vector(m.forward(spatial(features))),
            Self::Identity(_) => features,
        }
    }
}

/// Build the aggregation named `name`.
///
/// Returns `None` for unknown names. Token sequences are aggregated as
/// ``[batch, dim, tokens, 1]`` maps, so `work_with_tokens` does not change
/// the layer that is built.
pub fn build_aggregation<B: Backend>(
    name: &str,
    features_dim: usize,
    clusters: usize,
    work_with_tokens: bool,
    device: &B::Device,
) -> Option<Aggregation<B>> {
    let kind = AggregationKind::from_name(name)?;
    tracing::debug!(
        aggregation = name,
        features_dim,
        work_with_tokens,
        "building aggregation"
    );

    let vlad = || NetVladConfig::new(features_dim).with_clusters(clusters);
    Some(match kind {
        AggregationKind::Gem => Aggregation::Gem(GemConfig::new().init(device)),
        AggregationKind::Spoc => Aggregation::Spoc(Spoc),
        AggregationKind::Mac => Aggregation::Mac(Mac),
        AggregationKind::Rmac => Aggregation::Rmac(Rmac::default()),
        AggregationKind::NetVlad => Aggregation::NetVlad(vlad().init(device)),
        AggregationKind::Crn => Aggregation::Crn(vlad().init_crn(device)),
        AggregationKind::Rrm => Aggregation::Rrm(RrmConfig::new(features_dim).init(device)),
        AggregationKind::Cls | AggregationKind::SeqPool => Aggregation::Identity(Identity),
    })
}

/// Aggregation, optional L2, flatten, and optional projection + L2.
#[derive(Module, Debug)]
pub struct AggregationChain<B: Backend> {
    /// The aggregation layer.
    pub aggregation: Aggregation<B>,
    /// Where the L2 normalization sits around a pooling.
    pub l2: Ignored<L2Placement>,
    /// Descriptor normalization.
    pub norm: L2Norm,
    /// Output projection; followed by L2 normalization.
    pub projection: Option<Linear<B>>,
}

impl<B: Backend> AggregationChain<B> {
    /// Compose a chain.
    ///
    /// `l2` only applies to the pooling kinds; it is ignored otherwise.
    pub fn new(
        aggregation: Aggregation<B>,
        kind: AggregationKind,
        l2: L2Placement,
        projection: Option<Linear<B>>,
    ) -> Self {
        let l2 = if kind.is_pooling() { l2 } else { L2Placement::None };
        Self {
            aggregation,
            l2: Ignored(l2),
            norm: L2Norm::default(),
            projection,
        }
    }

    /// Forward Pass.
    ///
    /// `BeforePool` normalizes every location (every token, over the
    /// embedding dimension) before pooling; the pooled descriptor is not
    /// rescaled. `AfterPool` and the projection yield unit-norm rows.
    pub fn forward(
        &self,
        features: Features<B>,
    ) -> Tensor<B, 2> {
        let features = match *self.l2 {
            L2Placement::BeforePool => match features {
                Features::Map(x) => Features::Map(l2_normalize(x, 1)),
                Features::Tokens(x) => Features::Tokens(l2_normalize(x, 2)),
                Features::Vector(x) => Features::Vector(l2_normalize(x, 1)),
            },
            _ => features,
        };

        let x = match self.aggregation.forward(features) {
            Features::Map(x) => Flatten.forward(x),
            Features::Vector(x) => x,
            Features::Tokens(_) => panic!("aggregation left a token sequence"),
        };
        let x = match *self.l2 {
            L2Placement::AfterPool => self.norm.forward(x),
            _ => x,
        };

        match &self.projection {
            Some(fc) => self.norm.forward(fc.forward(x)),
            None => x,
        }
    }
}
