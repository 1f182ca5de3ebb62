//! # Pairwise Feature Comparer
//!
//! A small MLP head scoring whether a pair representation is "similar".

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::{relu, softmax};

/// Hidden widths of the comparer.
pub const COMPARER_HIDDEN: [usize; 4] = [512, 256, 128, 64];

/// [`FeatureComparer`] Config.
#[derive(Config, Debug)]
pub struct FeatureComparerConfig {
    /// Input dimension.
    pub d_input: usize,
}

impl FeatureComparerConfig {
    /// Initialize a [`FeatureComparer`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> FeatureComparer<B> {
        let widths: Vec<usize> = std::iter::once(self.d_input)
            .chain(COMPARER_HIDDEN)
            .chain(std::iter::once(2))
            .collect();
        FeatureComparer {
            layers: widths
                .windows(2)
                .map(|w| LinearConfig::new(w[0], w[1]).init(device))
                .collect(),
        }
    }
}

/// ``d_input -> 512 -> 256 -> 128 -> 64 -> 2`` with ReLU between layers.
#[derive(Module, Debug)]
pub struct FeatureComparer<B: Backend> {
    /// The linear layers.
    pub layers: Vec<Linear<B>>,
}

impl<B: Backend> FeatureComparer<B> {
    /// Input dimension.
    pub fn d_input(&self) -> usize {
        self.layers[0].weight.dims()[0]
    }

    /// ``[batch, d_input] -> [batch, 2]`` logits.
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let last = self.layers.len() - 1;
        self.layers
            .iter()
            .enumerate()
            .fold(input, |x, (i, layer)| {
                let x = layer.forward(x);
                if i < last { relu(x) } else { x }
            })
    }

    /// ``[batch, d_input] -> [batch]``, the probability of "similar".
    pub fn forward_similarity(
        &self,
        input: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        similarity(self.forward(input))
    }
}

/// The "similar" class probability of ``[batch, 2]`` logits.
pub fn similarity<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch, _] = logits.dims();
    softmax(logits, 1).narrow(1, 1, 1).reshape([batch])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    #[test]
    fn test_comparer_shapes() {
        let device = Default::default();
        let comparer: FeatureComparer<B> = FeatureComparerConfig::new(24).init(&device);
        assert_eq!(comparer.layers.len(), 5);
        assert_eq!(comparer.d_input(), 24);
        assert_eq!(comparer.layers[4].weight.dims(), [64, 2]);

        let input = Tensor::random([3, 24], Distribution::Default, &device);
        assert_eq!(comparer.forward(input.clone()).dims(), [3, 2]);

        let probs = comparer.forward_similarity(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(probs.len(), 3);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_similarity() {
        let device = Default::default();
        let logits: Tensor<B, 2> = Tensor::from_floats([[0.0, 0.0], [0.0, 10.0]], &device);
        let probs = similarity(logits).into_data().to_vec::<f32>().unwrap();
        assert_that!(probs[0], close_to(0.5, 1e-6));
        assert!(probs[1] > 0.999, "{}", probs[1]);
    }
}
