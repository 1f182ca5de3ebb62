//! # `ResNet` Layer Block
//!
//! A [`LayerBlock`] is a sequence of [`ResidualBlock`]s; one per
//! torchvision ``layer{1..4}`` child.

use crate::models::resnet::residual_block::{
    ResidualBlock, ResidualBlockConfig, ResidualBlockMeta,
};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`LayerBlock`] Meta API.
pub trait LayerBlockMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the layer block is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Get the effective stride of the layers.
    fn stride(&self) -> usize;
}

/// [`LayerBlock`] Configuration.
#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    /// The component blocks.
    pub blocks: Vec<ResidualBlockConfig>,
}

impl LayerBlockMeta for LayerBlockConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks.first().map_or(0, |b| b.in_planes())
    }

    fn out_planes(&self) -> usize {
        self.blocks.last().map_or(0, |b| b.out_planes())
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl LayerBlockConfig {
    /// Build a config.
    ///
    /// Only the first block strides (and projects the shortcut).
    pub fn build(
        num_blocks: usize,
        in_planes: usize,
        planes: usize,
        stride: usize,
        bottleneck: bool,
    ) -> Self {
        let first = ResidualBlockConfig::new(in_planes, planes)
            .with_stride(stride)
            .with_bottleneck(bottleneck);
        let out_planes = first.out_planes();

        let blocks = std::iter::once(first)
            .chain((1..num_blocks).map(|_| {
                ResidualBlockConfig::new(out_planes, planes).with_bottleneck(bottleneck)
            }))
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
                ));
            }
        }
        Ok(())
    }

    /// Initialize a new [`LayerBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> LayerBlock<B> {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }

        LayerBlock {
            blocks: self
                .blocks
                .iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// Sequence of [`ResidualBlock`]s.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    /// Internal residual blocks.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> LayerBlockMeta for LayerBlock<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks.first().map_or(0, |b| b.in_planes())
    }

    fn out_planes(&self) -> usize {
        self.blocks.last().map_or(0, |b| b.out_planes())
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl<B: Backend> LayerBlock<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |x, block| block.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_build_config() {
        let config = LayerBlockConfig::build(3, 64, 32, 2, true);
        assert_eq!(config.len(), 3);
        assert_eq!(config.in_planes(), 64);
        assert_eq!(config.out_planes(), 128);
        assert_eq!(config.stride(), 2);
        assert!(config.try_validate().is_ok());

        let empty = LayerBlockConfig::new(vec![]);
        assert!(empty.is_empty());
        assert!(empty.try_validate().is_err());

        let broken = LayerBlockConfig::new(vec![
            ResidualBlockConfig::new(4, 8),
            ResidualBlockConfig::new(16, 16),
        ]);
        assert!(broken.try_validate().is_err());
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: LayerBlock<B> = LayerBlockConfig::build(2, 4, 8, 2, false).init(&device);
        assert_eq!(layer.len(), 2);
        assert_eq!(layer.out_planes(), 8);
        assert!(layer.blocks[1].downsample.is_none());

        let output = layer.forward(Tensor::ones([2, 4, 6, 6], &device));
        assert_eq!(output.dims(), [2, 8, 3, 3]);
    }
}
