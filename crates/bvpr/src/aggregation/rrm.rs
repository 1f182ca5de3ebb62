//! # Residual Retrieval Module

use crate::layers::flatten::Flatten;
use crate::layers::norm::l2_normalize;
use burn::config::Config;
use burn::module::Module;
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::relu;

/// [`Rrm`] Config.
#[derive(Config, Debug)]
pub struct RrmConfig {
    /// Feature dimension.
    pub dim: usize,
}

impl RrmConfig {
    /// Initialize a [`Rrm`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Rrm<B> {
        Rrm {
            ln1: LayerNormConfig::new(self.dim).init(device),
            fc1: LinearConfig::new(self.dim, self.dim).init(device),
            fc2: LinearConfig::new(self.dim, self.dim).init(device),
            ln2: LayerNormConfig::new(self.dim).init(device),
        }
    }
}

/// Average pool, then a normalized residual MLP.
///
/// ``l2(ln2(x + fc2(relu(fc1(x)))))`` with ``x = ln1(avgpool(input))``.
#[derive(Module, Debug)]
pub struct Rrm<B: Backend> {
    /// Input norm.
    pub ln1: LayerNorm<B>,
    /// Expansion.
    pub fc1: Linear<B>,
    /// Projection.
    pub fc2: Linear<B>,
    /// Output norm.
    pub ln2: LayerNorm<B>,
}

impl<B: Backend> Rrm<B> {
    /// ``[batch, dim, h, w] -> [batch, dim]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = Flatten.forward(input.mean_dim(2).mean_dim(3));
        let x = self.ln1.forward(x);
        let out = self.fc2.forward(relu(self.fc1.forward(x.clone())));
        l2_normalize(self.ln2.forward(out + x), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::row_norms;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    #[test]
    fn test_rrm() {
        type B = NdArray<f32>;
        let device = Default::default();
        let rrm: Rrm<B> = RrmConfig::new(16).init(&device);

        let input = Tensor::random([3, 16, 4, 6], Distribution::Default, &device);
        let output = rrm.forward(input);
        assert_eq!(output.dims(), [3, 16]);
        for n in row_norms(output) {
            assert_that!(n, close_to(1.0, 1e-5));
        }
    }
}
