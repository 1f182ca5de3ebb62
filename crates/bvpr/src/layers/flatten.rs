//! # Pooled Map Flatten

use bimm_contracts::unpack_shape_contract;
use burn::prelude::{Backend, Tensor};

/// Flatten a pooled ``[batch, channels, 1, 1]`` map to ``[batch, channels]``.
///
/// Panics on maps that were not pooled to a single cell.
#[derive(Clone, Copy, Debug, Default)]
pub struct Flatten;

impl Flatten {
    /// Forward Pass.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch, channels] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch", "channels"],
            &[("height", 1), ("width", 1)]
        );
        input.reshape([batch, channels])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_flatten() {
        type B = NdArray<f32>;
        let device = Default::default();

        let input: Tensor<B, 4> = Tensor::ones([2, 6, 1, 1], &device);
        assert_eq!(Flatten.forward(input).dims(), [2, 6]);
    }

    #[test]
    #[should_panic]
    fn test_flatten_unpooled_panics() {
        type B = NdArray<f32>;
        let device = Default::default();

        let input: Tensor<B, 4> = Tensor::ones([2, 6, 3, 1], &device);
        Flatten.forward(input);
    }
}
