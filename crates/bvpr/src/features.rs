//! # Encoder Outputs
//!
//! Encoders emit one of three feature layouts; aggregations declare which
//! layouts they accept (see [`crate::config::AggregationKind::accepts`]).

use burn::prelude::{Backend, Tensor};

/// The layout of encoder features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureShape {
    /// Spatial map, ``[batch, channels, height, width]``.
    Map,
    /// Token sequence, ``[batch, tokens, dim]``.
    Tokens,
    /// Pooled vector, ``[batch, dim]``.
    Vector,
}

/// Encoder features.
#[derive(Debug, Clone)]
pub enum Features<B: Backend> {
    /// Spatial map, ``[batch, channels, height, width]``.
    Map(Tensor<B, 4>),
    /// Token sequence, ``[batch, tokens, dim]``.
    Tokens(Tensor<B, 3>),
    /// Pooled vector, ``[batch, dim]``.
    Vector(Tensor<B, 2>),
}

impl<B: Backend> Features<B> {
    /// The layout of these features.
    pub fn shape(&self) -> FeatureShape {
        match self {
            Self::Map(_) => FeatureShape::Map,
            Self::Tokens(_) => FeatureShape::Tokens,
            Self::Vector(_) => FeatureShape::Vector,
        }
    }

    /// The channel / embedding dimension.
    pub fn channels(&self) -> usize {
        match self {
            Self::Map(x) => x.dims()[1],
            Self::Tokens(x) => x.dims()[2],
            Self::Vector(x) => x.dims()[1],
        }
    }

    /// View the features as a spatial map.
    ///
    /// Tokens ``[B, N, D]`` become a ``[B, D, N, 1]`` map, so every spatial
    /// pooling also works over sequences.
    pub fn into_map(self) -> Option<Tensor<B, 4>> {
        match self {
            Self::Map(x) => Some(x),
            Self::Tokens(x) => Some(x.swap_dims(1, 2).unsqueeze_dim(3)),
            Self::Vector(_) => None,
        }
    }
}

/// Full encoder output.
#[derive(Debug, Clone)]
pub struct EncoderOutput<B: Backend> {
    /// Global image descriptor (class token / sequence pooling), if any.
    pub global: Option<Tensor<B, 2>>,

    /// The features handed to the aggregation chain.
    pub features: Features<B>,
}

impl<B: Backend> From<Features<B>> for EncoderOutput<B> {
    fn from(features: Features<B>) -> Self {
        Self {
            global: None,
            features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_tokens_into_map() {
        type B = NdArray<f32>;
        let device = Default::default();

        let tokens: Tensor<B, 3> = Tensor::ones([2, 5, 7], &device);
        let features = Features::Tokens(tokens);
        assert_eq!(features.shape(), FeatureShape::Tokens);
        assert_eq!(features.channels(), 7);

        let map = features.into_map().unwrap();
        assert_eq!(map.dims(), [2, 7, 5, 1]);

        let vector = Features::<B>::Vector(Tensor::ones([2, 3], &device));
        assert_eq!(vector.channels(), 3);
        assert!(vector.into_map().is_none());
    }
}
