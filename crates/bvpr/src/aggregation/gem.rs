//! # Generalized-Mean Pooling

use burn::config::Config;
use burn::module::{Module, Param};
use burn::prelude::{Backend, Tensor};

/// [`Gem`] Config.
#[derive(Config, Debug)]
pub struct GemConfig {
    /// Initial pooling exponent.
    #[config(default = "3.0")]
    pub p: f64,

    /// Activation floor.
    #[config(default = "1e-6")]
    pub eps: f64,
}

impl GemConfig {
    /// Initialize a [`Gem`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Gem<B> {
        Gem {
            p: Param::from_tensor(Tensor::from_floats([self.p as f32], device)),
            eps: self.eps,
        }
    }
}

/// `GeM` pooling with a learnable exponent.
///
/// ``(mean(clamp(x, eps)^p))^(1/p)`` over the spatial dims; ``p = 1`` is
/// average pooling and ``p -> inf`` approaches max pooling.
#[derive(Module, Debug)]
pub struct Gem<B: Backend> {
    /// Pooling exponent, ``[1]``.
    pub p: Param<Tensor<B, 1>>,
    /// Activation floor.
    pub eps: f64,
}

impl<B: Backend> Gem<B> {
    /// ``[batch, channels, h, w] -> [batch, channels, 1, 1]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let p = self.p.val().reshape([1, 1, 1, 1]);
        let x = input.clamp_min(self.eps).log().mul(p.clone()).exp();
        let x = x.mean_dim(2).mean_dim(3);
        x.log().div(p).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assert_tensors_close;
    use burn::backend::{Autodiff, NdArray};

    type B = NdArray<f32>;

    #[test]
    fn test_constant_map() {
        let device = Default::default();
        let gem: Gem<B> = GemConfig::new().init(&device);

        let input: Tensor<B, 4> = Tensor::ones([2, 3, 4, 5], &device).mul_scalar(0.5);
        let output = gem.forward(input);
        assert_tensors_close(output, Tensor::ones([2, 3, 1, 1], &device).mul_scalar(0.5), 1e-5);
    }

    #[test]
    fn test_p_one_is_average() {
        let device = Default::default();
        let gem: Gem<B> = GemConfig::new().with_p(1.0).init(&device);

        let input: Tensor<B, 4> =
            Tensor::from_floats([[[[1.0, 2.0], [3.0, 6.0]]]], &device);
        let output = gem.forward(input);
        assert_tensors_close(output, Tensor::from_floats([[[[3.0]]]], &device), 1e-5);
    }

    #[test]
    fn test_between_mean_and_max() {
        let device = Default::default();
        let gem: Gem<B> = GemConfig::new().init(&device);

        let input: Tensor<B, 4> =
            Tensor::from_floats([[[[1.0, 2.0], [3.0, 6.0]]]], &device);
        let value = gem.forward(input).into_scalar();
        assert!(value > 3.0 && value < 6.0, "{value}");
    }

    #[test]
    fn test_p_is_learnable() {
        type A = Autodiff<B>;
        let device = Default::default();
        let gem: Gem<A> = GemConfig::new().init(&device);
        assert_eq!(gem.num_params(), 1);

        let input: Tensor<A, 4> = Tensor::from_floats([[[[1.0, 2.0], [3.0, 6.0]]]], &device);
        let grads = gem.forward(input).sum().backward();
        assert!(gem.p.grad(&grads).is_some());
    }
}
