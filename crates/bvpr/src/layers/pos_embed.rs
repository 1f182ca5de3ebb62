//! # Positional Embedding Grids

use bimm_contracts::unpack_shape_contract;
use burn::nn::interpolate::{Interpolate2dConfig, InterpolateMode};
use burn::prelude::{Backend, Tensor};

/// Resample a ``[1, h * w, dim]`` positional grid to ``[1, h' * w', dim]``.
///
/// Bilinear; the grid is returned unchanged when the sizes already agree.
pub fn resample_positional_grid<B: Backend>(
    grid: Tensor<B, 3>,
    from: [usize; 2],
    to: [usize; 2],
) -> Tensor<B, 3> {
    let [dim] = unpack_shape_contract!(
        ["one", "tokens" = "height" * "width", "dim"],
        &grid,
        &["dim"],
        &[("one", 1), ("height", from[0]), ("width", from[1])]
    );
    if from == to {
        return grid;
    }

    let x = grid
        .reshape([1, from[0], from[1], dim])
        .permute([0, 3, 1, 2]);
    let x = Interpolate2dConfig::new()
        .with_output_size(Some(to))
        .with_mode(InterpolateMode::Linear)
        .init()
        .forward(x);

    x.permute([0, 2, 3, 1]).reshape([1, to[0] * to[1], dim])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assert_tensors_close;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn test_same_size_is_identity() {
        let device = Default::default();
        let grid: Tensor<B, 3> = Tensor::random([1, 12, 4], Distribution::Default, &device);
        let output = resample_positional_grid(grid.clone(), [3, 4], [3, 4]);
        assert_tensors_close(output, grid, 0.0);
    }

    #[test]
    fn test_resample_constant_grid() {
        let device = Default::default();
        let grid: Tensor<B, 3> = Tensor::ones([1, 4, 3], &device).mul_scalar(2.0);

        let output = resample_positional_grid(grid, [2, 2], [3, 5]);
        assert_eq!(output.dims(), [1, 15, 3]);
        assert_tensors_close(output, Tensor::ones([1, 15, 3], &device).mul_scalar(2.0), 1e-5);
    }
}
