//! # Residual Block
//!
//! A [`ResidualBlock`] is either a `ResNet` basic block (two ``3x3`` convs)
//! or a bottleneck block (``1x1 -> 3x3 -> 1x1``, expansion 4); the
//! bottleneck case is the one carrying `conv3` / `bn3`.
//!
//! Field names follow the torchvision state dictionary, so the block is
//! its own checkpoint load target.

use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::relu;

/// Bottleneck channel expansion.
pub const BOTTLENECK_EXPANSION: usize = 4;

/// [`ResidualBlock`] Meta API.
pub trait ResidualBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The stride of the block.
    fn stride(&self) -> usize;

    /// Is this a bottleneck block?
    fn is_bottleneck(&self) -> bool;
}

/// [`ResidualBlock`] Config.
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    /// Input planes.
    pub in_planes: usize,

    /// Inner planes; output is ``planes * expansion``.
    pub planes: usize,

    /// Stride of the spatial conv.
    #[config(default = "1")]
    pub stride: usize,

    /// Use the bottleneck layout.
    #[config(default = "false")]
    pub bottleneck: bool,
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        if self.bottleneck {
            self.planes * BOTTLENECK_EXPANSION
        } else {
            self.planes
        }
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn is_bottleneck(&self) -> bool {
        self.bottleneck
    }
}

fn conv3x3(
    in_planes: usize,
    out_planes: usize,
    stride: usize,
) -> Conv2dConfig {
    Conv2dConfig::new([in_planes, out_planes], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
}

fn conv1x1(
    in_planes: usize,
    out_planes: usize,
) -> Conv2dConfig {
    Conv2dConfig::new([in_planes, out_planes], [1, 1]).with_bias(false)
}

impl ResidualBlockConfig {
    /// Initialize a [`ResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        let out_planes = self.out_planes();
        let bn = |planes: usize| BatchNormConfig::new(planes).init(device);

        let downsample = (self.stride != 1 || self.in_planes != out_planes).then(|| {
            ConvNorm2dConfig::pointwise(self.in_planes, out_planes, self.stride).init(device)
        });

        if self.bottleneck {
            ResidualBlock {
                conv1: conv1x1(self.in_planes, self.planes).init(device),
                bn1: bn(self.planes),
                conv2: conv3x3(self.planes, self.planes, self.stride).init(device),
                bn2: bn(self.planes),
                conv3: Some(conv1x1(self.planes, out_planes).init(device)),
                bn3: Some(bn(out_planes)),
                downsample,
            }
        } else {
            ResidualBlock {
                conv1: conv3x3(self.in_planes, self.planes, self.stride).init(device),
                bn1: bn(self.planes),
                conv2: conv3x3(self.planes, self.planes, 1).init(device),
                bn2: bn(self.planes),
                conv3: None,
                bn3: None,
                downsample,
            }
        }
    }
}

/// Basic or bottleneck residual block.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    /// First conv.
    pub conv1: Conv2d<B>,
    /// First norm.
    pub bn1: BatchNorm<B, 2>,
    /// Second conv.
    pub conv2: Conv2d<B>,
    /// Second norm.
    pub bn2: BatchNorm<B, 2>,
    /// Bottleneck expansion conv.
    pub conv3: Option<Conv2d<B>>,
    /// Bottleneck expansion norm.
    pub bn3: Option<BatchNorm<B, 2>>,
    /// Shortcut projection.
    pub downsample: Option<ConvNorm2d<B>>,
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn in_planes(&self) -> usize {
        self.conv1.weight.dims()[1]
    }

    fn out_planes(&self) -> usize {
        match &self.conv3 {
            Some(conv) => conv.weight.dims()[0],
            None => self.conv2.weight.dims()[0],
        }
    }

    fn stride(&self) -> usize {
        match &self.conv3 {
            Some(_) => self.conv2.stride[0],
            None => self.conv1.stride[0],
        }
    }

    fn is_bottleneck(&self) -> bool {
        self.conv3.is_some()
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_planes", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())]
        );
        let stride = self.stride();
        let [out_height, out_width] = [in_height.div_ceil(stride), in_width.div_ceil(stride)];

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = relu(self.bn1.forward(self.conv1.forward(input)));
        let x = self.bn2.forward(self.conv2.forward(x));
        let x = match (&self.conv3, &self.bn3) {
            (Some(conv3), Some(bn3)) => bn3.forward(conv3.forward(relu(x))),
            _ => x,
        };

        let x = relu(x + identity);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}
