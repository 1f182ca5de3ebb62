//! # Plain Convolution Stacks
//!
//! The ``features`` stacks of torchvision `VGG-16` and `AlexNet`: a flat
//! sequence of conv / relu / max-pool layers, addressed by position
//! (``features.{i}``) exactly as the PyTorch ``Sequential`` is.
//!
//! Checkpoints load into [`ConvFeatures`] (the conv weights only); the
//! runnable [`PlainConvNet`] pairs those weights with a (possibly
//! truncated) layer layout.

use crate::backbone::freeze::{ParamUnit, ParamUnits, TrainabilityMap, freeze_if};
use bimm_contracts::assert_shape_contract;
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::relu;
use serde::{Deserialize, Serialize};

/// One layer of a plain stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlainLayer {
    /// Biased conv.
    Conv {
        /// Output channels.
        channels: usize,
        /// Square kernel size.
        kernel: usize,
        /// Stride.
        stride: usize,
        /// Symmetric padding.
        padding: usize,
    },
    /// In-place ReLU.
    Relu,
    /// Max-pool.
    MaxPool {
        /// Square kernel size.
        kernel: usize,
        /// Stride.
        stride: usize,
    },
}

impl PlainLayer {
    fn conv(
        channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self::Conv {
            channels,
            kernel,
            stride,
            padding,
        }
    }
}

/// [`PlainConvNet`] Config.
#[derive(Config, Debug)]
pub struct PlainConvConfig {
    /// The layer stack, in ``features`` order.
    pub layers: Vec<PlainLayer>,

    /// Input channels.
    #[config(default = "3")]
    pub in_channels: usize,
}

impl PlainConvConfig {
    /// torchvision ``vgg16().features``; 31 layers.
    pub fn vgg16() -> Self {
        let mut layers = Vec::new();
        for (stage, &channels) in [64, 128, 256, 512, 512].iter().enumerate() {
            let convs = if stage < 2 { 2 } else { 3 };
            for _ in 0..convs {
                layers.push(PlainLayer::conv(channels, 3, 1, 1));
                layers.push(PlainLayer::Relu);
            }
            layers.push(PlainLayer::MaxPool {
                kernel: 2,
                stride: 2,
            });
        }
        Self::new(layers)
    }

    /// torchvision ``alexnet().features``; 13 layers.
    pub fn alexnet() -> Self {
        let pool = PlainLayer::MaxPool {
            kernel: 3,
            stride: 2,
        };
        Self::new(vec![
            PlainLayer::conv(64, 11, 4, 2),
            PlainLayer::Relu,
            pool,
            PlainLayer::conv(192, 5, 1, 2),
            PlainLayer::Relu,
            pool,
            PlainLayer::conv(384, 3, 1, 1),
            PlainLayer::Relu,
            PlainLayer::conv(256, 3, 1, 1),
            PlainLayer::Relu,
            PlainLayer::conv(256, 3, 1, 1),
            PlainLayer::Relu,
            pool,
        ])
    }

    /// Divide every conv width by `divisor`.
    pub fn with_width_divisor(
        self,
        divisor: usize,
    ) -> Self {
        let layers = self
            .layers
            .into_iter()
            .map(|layer| match layer {
                PlainLayer::Conv {
                    channels,
                    kernel,
                    stride,
                    padding,
                } => PlainLayer::conv((channels / divisor).max(1), kernel, stride, padding),
                other => other,
            })
            .collect();
        Self { layers, ..self }
    }

    /// Drop the trailing `count` layers.
    pub fn truncated(
        self,
        count: usize,
    ) -> Self {
        let keep = self.layers.len().saturating_sub(count);
        let mut layers = self.layers;
        layers.truncate(keep);
        Self { layers, ..self }
    }

    /// Number of conv layers.
    pub fn num_convs(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| matches!(l, PlainLayer::Conv { .. }))
            .count()
    }

    /// Output channels of the last conv.
    pub fn out_channels(&self) -> usize {
        self.layers
            .iter()
            .rev()
            .find_map(|l| match l {
                PlainLayer::Conv { channels, .. } => Some(*channels),
                _ => None,
            })
            .unwrap_or(self.in_channels)
    }

    /// PyTorch remaps of ``features.{i}`` onto ``convs.{j}``.
    pub fn pytorch_key_remaps(&self) -> Vec<(String, String)> {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| matches!(l, PlainLayer::Conv { .. }))
            .enumerate()
            .map(|(conv_idx, (layer_idx, _))| {
                (
                    format!(r"^features\.{layer_idx}\."),
                    format!("convs.{conv_idx}."),
                )
            })
            .collect()
    }

    /// Initialize the conv weights of the stack.
    pub fn init_features<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvFeatures<B> {
        let mut in_channels = self.in_channels;
        let mut convs = Vec::with_capacity(self.num_convs());
        for layer in &self.layers {
            if let PlainLayer::Conv {
                channels,
                kernel,
                stride,
                padding,
            } = *layer
            {
                convs.push(
                    Conv2dConfig::new([in_channels, channels], [kernel, kernel])
                        .with_stride([stride, stride])
                        .with_padding(PaddingConfig2d::Explicit(padding, padding))
                        .init(device),
                );
                in_channels = channels;
            }
        }
        ConvFeatures { convs }
    }

    /// Initialize a [`PlainConvNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PlainConvNet<B> {
        self.init_features(device).into_net(self)
    }
}

/// Conv weights of a plain stack, in order.
#[derive(Module, Debug)]
pub struct ConvFeatures<B: Backend> {
    /// Conv layers.
    pub convs: Vec<Conv2d<B>>,
}

impl<B: Backend> ConvFeatures<B> {
    /// Pair the weights with a layout.
    ///
    /// The layout may be a truncation of the one the weights were built
    /// for; convs past the end of it are dropped.
    pub fn into_net(
        self,
        config: &PlainConvConfig,
    ) -> PlainConvNet<B> {
        let mut convs = self.convs;
        convs.truncate(config.num_convs());

        let pools = config
            .layers
            .iter()
            .filter_map(|l| match *l {
                PlainLayer::MaxPool { kernel, stride } => Some(
                    MaxPool2dConfig::new([kernel, kernel])
                        .with_strides([stride, stride])
                        .init(),
                ),
                _ => None,
            })
            .collect();

        PlainConvNet {
            convs,
            pools,
            layout: Ignored(config.layers.clone()),
        }
    }
}

/// A runnable plain conv stack.
#[derive(Module, Debug)]
pub struct PlainConvNet<B: Backend> {
    /// Conv layers.
    pub convs: Vec<Conv2d<B>>,
    /// Pool layers.
    pub pools: Vec<MaxPool2d>,
    /// The layer layout.
    pub layout: Ignored<Vec<PlainLayer>>,
}

impl<B: Backend> PlainConvNet<B> {
    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layout.len()
    }

    /// Is the stack empty?
    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let in_channels = self
            .convs
            .first()
            .map_or(input.dims()[1], |c| c.weight.dims()[1]);
        assert_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &[("in_channels", in_channels)]
        );

        let mut convs = self.convs.iter();
        let mut pools = self.pools.iter();
        let mut x = input;
        for layer in self.layout.iter() {
            x = match layer {
                PlainLayer::Conv { .. } => match convs.next() {
                    Some(conv) => conv.forward(x),
                    None => x,
                },
                PlainLayer::Relu => relu(x),
                PlainLayer::MaxPool { .. } => match pools.next() {
                    Some(pool) => pool.forward(x),
                    None => x,
                },
            };
        }
        x
    }

    fn unit_name(idx: usize) -> String {
        format!("features.{idx}")
    }
}

impl<B: Backend> ParamUnits for PlainConvNet<B> {
    fn param_units(&self) -> Vec<ParamUnit> {
        let mut convs = self.convs.iter();
        self.layout
            .iter()
            .enumerate()
            .map(|(idx, layer)| {
                let num_params = match layer {
                    PlainLayer::Conv { .. } => convs.next().map_or(0, |c| c.num_params()),
                    _ => 0,
                };
                ParamUnit::new(Self::unit_name(idx), num_params)
            })
            .collect()
    }

    fn apply_trainability(
        self,
        map: &TrainabilityMap,
    ) -> Self {
        let conv_layers: Vec<usize> = self
            .layout
            .iter()
            .enumerate()
            .filter(|(_, l)| matches!(l, PlainLayer::Conv { .. }))
            .map(|(idx, _)| idx)
            .collect();

        Self {
            convs: self
                .convs
                .into_iter()
                .zip(conv_layers)
                .map(|(conv, idx)| freeze_if(conv, map.is_frozen(&Self::unit_name(idx))))
                .collect(),
            ..self
        }
    }
}
