//! # Cluster-Based Aggregation
//!
//! [`NetVlad`] soft-assigns every local descriptor to `clusters` learned
//! centroids and accumulates residuals; [`Crn`] additionally re-weights the
//! assignments with a learned spatial context mask.
//!
//! Both emit ``dim * clusters`` features, intra-normalized per cluster and
//! then L2-normalized.

use crate::layers::norm::l2_normalize;
use bimm_contracts::assert_shape_contract;
use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::interpolate::{Interpolate2dConfig, InterpolateMode};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use burn::tensor::activation::{relu, softmax};

/// [`NetVlad`] Config.
#[derive(Config, Debug)]
pub struct NetVladConfig {
    /// Number of clusters.
    #[config(default = "64")]
    pub clusters: usize,

    /// Local descriptor dimension.
    pub dim: usize,

    /// L2-normalize descriptors before assignment.
    #[config(default = "true")]
    pub normalize_input: bool,
}

impl NetVladConfig {
    /// Output dimension, ``dim * clusters``.
    pub fn output_dim(&self) -> usize {
        self.dim * self.clusters
    }

    /// Initialize a [`NetVlad`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> NetVlad<B> {
        NetVlad {
            conv: Conv2dConfig::new([self.dim, self.clusters], [1, 1])
                .with_bias(false)
                .init(device),
            centroids: Param::from_tensor(Tensor::random(
                [self.clusters, self.dim],
                Distribution::Default,
                device,
            )),
            normalize_input: self.normalize_input,
        }
    }

    /// Initialize a [`Crn`].
    pub fn init_crn<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Crn<B> {
        Crn {
            vlad: self.init(device),
            crn: ContextMaskConfig::new(self.dim).init(device),
        }
    }
}

/// `NetVLAD` pooling.
#[derive(Module, Debug)]
pub struct NetVlad<B: Backend> {
    /// Soft-assignment logits, ``dim -> clusters``.
    pub conv: Conv2d<B>,
    /// Cluster centroids, ``[clusters, dim]``.
    pub centroids: Param<Tensor<B, 2>>,
    /// L2-normalize descriptors before assignment.
    pub normalize_input: bool,
}

impl<B: Backend> NetVlad<B> {
    /// Number of clusters.
    pub fn clusters(&self) -> usize {
        self.centroids.dims()[0]
    }

    /// Descriptor dimension.
    pub fn dim(&self) -> usize {
        self.centroids.dims()[1]
    }

    fn prepare(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        if self.normalize_input {
            l2_normalize(input, 1)
        } else {
            input
        }
    }

    /// Per-location assignment weights, ``[batch, clusters, h * w]``.
    fn soft_assign(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 3> {
        let logits = self.conv.forward(x).flatten::<3>(2, 3);
        softmax(logits, 1)
    }

    /// Accumulate weighted residuals and normalize.
    fn aggregate(
        &self,
        x: Tensor<B, 4>,
        assign: Tensor<B, 3>,
    ) -> Tensor<B, 2> {
        let [batch, dim, _, _] = x.dims();
        let clusters = self.clusters();
        let x = x.flatten::<3>(2, 3);

        // sum_m a[k, m] * (x[:, m] - c[k])
        let weighted = assign.clone().matmul(x.swap_dims(1, 2));
        let mass = assign.sum_dim(2);
        let centroids = self.centroids.val().unsqueeze_dim::<3>(0);
        let vlad = weighted - mass.mul(centroids);

        let vlad = l2_normalize(vlad, 2);
        l2_normalize(vlad.reshape([batch, clusters * dim]), 1)
    }

    /// ``[batch, dim, h, w] -> [batch, dim * clusters]``
    ///
    /// Token sequences are handled as ``[batch, dim, tokens, 1]`` maps.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        assert_shape_contract!(
            ["batch", "dim", "height", "width"],
            &input,
            &[("dim", self.dim())]
        );
        let x = self.prepare(input);
        let assign = self.soft_assign(x.clone());
        self.aggregate(x, assign)
    }
}

/// [`ContextMask`] Config.
#[derive(Config, Debug)]
pub struct ContextMaskConfig {
    /// Input channels.
    pub dim: usize,
}

impl ContextMaskConfig {
    /// Initialize a [`ContextMask`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ContextMask<B> {
        let filter = |out: usize, k: usize| {
            Conv2dConfig::new([self.dim, out], [k, k])
                .with_padding(PaddingConfig2d::Explicit(k / 2, k / 2))
                .init(device)
        };
        ContextMask {
            downsample_pool: AvgPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            filter_3_3: filter(32, 3),
            filter_5_5: filter(32, 5),
            filter_7_7: filter(20, 7),
            acc_w: Conv2dConfig::new([84, 1], [1, 1]).init(device),
        }
    }
}

/// Multi-scale context re-weighting mask.
#[derive(Module, Debug)]
pub struct ContextMask<B: Backend> {
    /// Halving pool.
    pub downsample_pool: AvgPool2d,
    /// 3x3 context filters.
    pub filter_3_3: Conv2d<B>,
    /// 5x5 context filters.
    pub filter_5_5: Conv2d<B>,
    /// 7x7 context filters.
    pub filter_7_7: Conv2d<B>,
    /// Accumulation weights.
    pub acc_w: Conv2d<B>,
}

impl<B: Backend> ContextMask<B> {
    /// ``[batch, dim, h, w] -> [batch, 1, h, w]``, non-negative.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [_, _, h, w] = input.dims();
        let x = self.downsample_pool.forward(input);
        let g = Tensor::cat(
            vec![
                self.filter_3_3.forward(x.clone()),
                self.filter_5_5.forward(x.clone()),
                self.filter_7_7.forward(x),
            ],
            1,
        );
        let mask = relu(self.acc_w.forward(relu(g)));
        Interpolate2dConfig::new()
            .with_output_size(Some([h, w]))
            .with_mode(InterpolateMode::Linear)
            .init()
            .forward(mask)
    }
}

/// Contextual reweighting network: `NetVLAD` with context-weighted assignments.
#[derive(Module, Debug)]
pub struct Crn<B: Backend> {
    /// The underlying `NetVLAD`.
    pub vlad: NetVlad<B>,
    /// Context mask.
    pub crn: ContextMask<B>,
}

impl<B: Backend> Crn<B> {
    /// ``[batch, dim, h, w] -> [batch, dim * clusters]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = self.vlad.prepare(input);
        let mask = self.crn.forward(x.clone()).flatten::<3>(2, 3);
        let assign = self.vlad.soft_assign(x.clone()).mul(mask);
        self.vlad.aggregate(x, assign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_tensors_close, row_norms};
    use burn::backend::NdArray;
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    #[test]
    fn test_output_dim() {
        assert_eq!(NetVladConfig::new(128).output_dim(), 8192);
        assert_eq!(NetVladConfig::new(256).with_clusters(8).output_dim(), 2048);
    }

    #[test]
    fn test_netvlad_unit_norm() {
        let device = Default::default();
        let vlad: NetVlad<B> = NetVladConfig::new(6).with_clusters(4).init(&device);
        assert_eq!(vlad.clusters(), 4);
        assert_eq!(vlad.dim(), 6);

        let input = Tensor::random([3, 6, 5, 4], Distribution::Default, &device);
        let output = vlad.forward(input);
        assert_eq!(output.dims(), [3, 24]);
        for n in row_norms(output) {
            assert_that!(n, close_to(1.0, 1e-5));
        }
    }

    #[test]
    fn test_netvlad_matches_loop() {
        let device = Default::default();
        let vlad: NetVlad<B> = NetVladConfig::new(3)
            .with_clusters(2)
            .with_normalize_input(false)
            .init(&device);

        let input: Tensor<B, 4> = Tensor::random([1, 3, 2, 2], Distribution::Default, &device);
        let assign = vlad.soft_assign(input.clone());
        let x = input.clone().flatten::<3>(2, 3);

        let mut rows = Vec::new();
        for k in 0..2 {
            let c = vlad.centroids.val().narrow(0, k, 1).reshape([1, 3, 1]);
            let a = assign.clone().narrow(1, k, 1);
            let r = (x.clone() - c).mul(a).sum_dim(2).reshape([1, 1, 3]);
            rows.push(l2_normalize(r, 2));
        }
        let expected = l2_normalize(Tensor::cat(rows, 1).reshape([1, 6]), 1);

        assert_tensors_close(vlad.forward(input), expected, 1e-5);
    }

    #[test]
    fn test_crn() {
        let device = Default::default();
        let crn: Crn<B> = NetVladConfig::new(4).with_clusters(3).init_crn(&device);

        let mask = crn.crn.forward(Tensor::ones([2, 4, 5, 7], &device));
        assert_eq!(mask.dims(), [2, 1, 5, 7]);

        let output = crn.forward(Tensor::random([2, 4, 5, 7], Distribution::Default, &device));
        assert_eq!(output.dims(), [2, 12]);
    }
}
