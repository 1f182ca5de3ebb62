//! # L2 Normalization

use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Lower bound on the norm; matches ``torch.nn.functional.normalize``.
pub const L2_EPSILON: f64 = 1e-12;

/// Scale `input` to unit L2 norm along `dim`.
pub fn l2_normalize<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    dim: usize,
) -> Tensor<B, D> {
    let norm = input
        .clone()
        .powf_scalar(2.0)
        .sum_dim(dim)
        .sqrt()
        .clamp_min(L2_EPSILON);
    input.div(norm)
}

/// L2 normalization layer.
#[derive(Module, Clone, Debug)]
pub struct L2Norm {
    /// The normalized dimension.
    pub dim: usize,
}

impl Default for L2Norm {
    fn default() -> Self {
        Self { dim: 1 }
    }
}

impl L2Norm {
    /// Forward Pass.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        l2_normalize(input, self.dim)
    }
}
