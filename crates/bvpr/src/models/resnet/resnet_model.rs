//! # `ResNet` Models
//!
//! [`ResNet`] holds the full torchvision classifier parameters, and is the
//! target checkpoints are loaded into. [`ResNetTrunk`] is the truncated
//! feature encoder built from it.

use crate::backbone::freeze::{ParamUnit, ParamUnits, TrainabilityMap, freeze_if};
use crate::config::{ResNetDepth, ResNetStage};
use crate::models::resnet::layer_block::{LayerBlock, LayerBlockConfig, LayerBlockMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::relu;

/// Top-level children of the torchvision classifier, in forward order.
pub const RESNET_CHILDREN: [&str; 10] = [
    "conv1", "bn1", "relu", "maxpool", "layer1", "layer2", "layer3", "layer4", "avgpool", "fc",
];

/// [`ResNet`] Config.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Blocks per layer.
    pub layers: [usize; 4],

    /// Use bottleneck blocks.
    #[config(default = "false")]
    pub bottleneck: bool,

    /// Classifier width.
    #[config(default = "1000")]
    pub num_classes: usize,

    /// Stem width; layer ``i`` has ``stem_planes * 2^i`` inner planes.
    #[config(default = "64")]
    pub stem_planes: usize,
}

impl ResNetConfig {
    /// The torchvision config for a depth.
    pub fn for_depth(depth: ResNetDepth) -> Self {
        match depth {
            ResNetDepth::R18 => Self::new([2, 2, 2, 2]),
            ResNetDepth::R50 => Self::new([3, 4, 6, 3]).with_bottleneck(true),
            ResNetDepth::R101 => Self::new([3, 4, 23, 3]).with_bottleneck(true),
        }
    }

    /// Configs of ``layer1..layer4``.
    pub fn layer_configs(&self) -> [LayerBlockConfig; 4] {
        let mut in_planes = self.stem_planes;
        std::array::from_fn(|idx| {
            let planes = self.stem_planes << idx;
            let stride = if idx == 0 { 1 } else { 2 };
            let layer = LayerBlockConfig::build(
                self.layers[idx],
                in_planes,
                planes,
                stride,
                self.bottleneck,
            );
            in_planes = layer.out_planes();
            layer
        })
    }

    /// Output planes of the final layer.
    pub fn out_planes(&self) -> usize {
        self.layer_configs()[3].out_planes()
    }

    /// Initialize a [`ResNet`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet<B> {
        let [layer1, layer2, layer3, layer4] = self.layer_configs().map(|l| l.init(device));

        ResNet {
            // 7x7 conv, /2
            conv1: Conv2dConfig::new([3, self.stem_planes], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(self.stem_planes).init(device),
            layer1,
            layer2,
            layer3,
            layer4,
            fc: LinearConfig::new(self.out_planes(), self.num_classes).init(device),
        }
    }
}

/// Parameters of a torchvision `ResNet` classifier.
///
/// The stateless children (``relu``, ``maxpool``, ``avgpool``) carry no
/// weights and are re-created by [`ResNet::into_trunk`].
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    /// Stem conv.
    pub conv1: Conv2d<B>,
    /// Stem norm.
    pub bn1: BatchNorm<B, 2>,
    /// ``conv2_x``.
    pub layer1: LayerBlock<B>,
    /// ``conv3_x``.
    pub layer2: LayerBlock<B>,
    /// ``conv4_x``.
    pub layer3: LayerBlock<B>,
    /// ``conv5_x``.
    pub layer4: LayerBlock<B>,
    /// Classifier.
    pub fc: Linear<B>,
}

impl<B: Backend> ResNet<B> {
    /// Drop the trailing children for `stage`.
    pub fn into_trunk(
        self,
        stage: ResNetStage,
    ) -> ResNetTrunk<B> {
        let kept = &RESNET_CHILDREN[..RESNET_CHILDREN.len() - stage.dropped_children()];
        let layers = [
            ("layer1", self.layer1),
            ("layer2", self.layer2),
            ("layer3", self.layer3),
            ("layer4", self.layer4),
        ]
        .into_iter()
        .filter(|(name, _)| kept.contains(name))
        .map(|(_, layer)| layer)
        .collect();

        ResNetTrunk {
            conv1: self.conv1,
            bn1: self.bn1,
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layers,
        }
    }
}

/// Truncated `ResNet` feature encoder.
#[derive(Module, Debug)]
pub struct ResNetTrunk<B: Backend> {
    /// Stem conv.
    pub conv1: Conv2d<B>,
    /// Stem norm.
    pub bn1: BatchNorm<B, 2>,
    /// Stem pool.
    pub maxpool: MaxPool2d,
    /// The kept ``layer{i}`` children.
    pub layers: Vec<LayerBlock<B>>,
}

impl<B: Backend> ResNetTrunk<B> {
    /// Output channels of the trunk.
    pub fn out_planes(&self) -> usize {
        self.layers
            .last()
            .map_or(self.conv1.weight.dims()[0], |l| l.out_planes())
    }

    /// Forward Pass.
    ///
    /// ``[batch, 3, height, width] -> [batch, out_planes, h', w']``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "rgb", "height", "width"],
            &input,
            &["batch"],
            &[("rgb", 3)]
        );

        let x = relu(self.bn1.forward(self.conv1.forward(input)));
        let x = self.maxpool.forward(x);
        let x = self
            .layers
            .iter()
            .fold(x, |x, layer| layer.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "channels", "height", "width"],
            &x,
            &[("batch", batch), ("channels", self.out_planes())]
        );

        x
    }
}

impl<B: Backend> ParamUnits for ResNetTrunk<B> {
    fn param_units(&self) -> Vec<ParamUnit> {
        let mut units = vec![
            ParamUnit::new("conv1", self.conv1.num_params()),
            ParamUnit::new("bn1", self.bn1.num_params()),
            ParamUnit::new("relu", 0),
            ParamUnit::new("maxpool", 0),
        ];
        units.extend(
            self.layers
                .iter()
                .enumerate()
                .map(|(idx, layer)| {
                    ParamUnit::new(format!("layer{}", idx + 1), layer.num_params())
                }),
        );
        units
    }

    fn apply_trainability(
        self,
        map: &TrainabilityMap,
    ) -> Self {
        Self {
            conv1: freeze_if(self.conv1, map.is_frozen("conv1")),
            bn1: freeze_if(self.bn1, map.is_frozen("bn1")),
            maxpool: self.maxpool,
            layers: self
                .layers
                .into_iter()
                .enumerate()
                .map(|(idx, layer)| freeze_if(layer, map.is_frozen(&format!("layer{}", idx + 1))))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::freeze::FreezePolicy;
    use burn::backend::{Autodiff, NdArray};

    type B = NdArray<f32>;

    fn tiny() -> ResNetConfig {
        ResNetConfig::new([1, 1, 1, 1])
            .with_stem_planes(4)
            .with_num_classes(10)
    }

    #[test]
    fn test_depth_configs() {
        let r18 = ResNetConfig::for_depth(ResNetDepth::R18);
        assert_eq!(r18.out_planes(), 512);

        let r50 = ResNetConfig::for_depth(ResNetDepth::R50);
        assert_eq!(r50.out_planes(), 2048);
        assert_eq!(r50.layer_configs()[2].out_planes(), 1024);

        let r101 = ResNetConfig::for_depth(ResNetDepth::R101);
        assert_eq!(r101.layer_configs()[2].len(), 23);
    }

    #[test]
    fn test_truncation() {
        let device = Default::default();

        let trunk: ResNetTrunk<B> = tiny().init(&device).into_trunk(ResNetStage::Conv4);
        assert_eq!(trunk.layers.len(), 3);
        assert_eq!(trunk.out_planes(), 16);

        let output = trunk.forward(Tensor::ones([2, 3, 64, 64], &device));
        assert_eq!(output.dims(), [2, 16, 4, 4]);

        let trunk: ResNetTrunk<B> = tiny().init(&device).into_trunk(ResNetStage::Conv5);
        assert_eq!(trunk.layers.len(), 4);
        assert_eq!(trunk.out_planes(), 32);

        let output = trunk.forward(Tensor::ones([2, 3, 64, 64], &device));
        assert_eq!(output.dims(), [2, 32, 2, 2]);
    }

    #[test]
    fn test_units() {
        let device = Default::default();
        let trunk: ResNetTrunk<B> = tiny().init(&device).into_trunk(ResNetStage::Conv4);

        let names: Vec<String> = trunk.param_units().into_iter().map(|u| u.name).collect();
        assert_eq!(
            names,
            vec!["conv1", "bn1", "relu", "maxpool", "layer1", "layer2", "layer3"]
        );

        let total: usize = trunk.param_units().iter().map(|u| u.num_params).sum();
        assert_eq!(total, trunk.num_params());
    }

    #[test]
    fn test_apply_trainability() {
        type A = Autodiff<B>;
        let device = Default::default();

        let trunk: ResNetTrunk<A> = tiny().init(&device).into_trunk(ResNetStage::Conv5);
        let map = FreezePolicy::BeforeUnit("layer2".to_string())
            .resolve(trunk.param_units())
            .unwrap();
        let trunk = trunk.apply_trainability(&map);

        assert!(!trunk.conv1.weight.val().is_require_grad());
        assert!(!trunk.bn1.gamma.val().is_require_grad());
        assert!(!trunk.layers[0].blocks[0].conv1.weight.val().is_require_grad());
        assert!(trunk.layers[1].blocks[0].conv1.weight.val().is_require_grad());
        assert!(trunk.layers[3].blocks[0].conv2.weight.val().is_require_grad());
    }
}
