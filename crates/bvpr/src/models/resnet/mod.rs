//! # `ResNet`
//!
//! * [`resnet_model::ResNet`] - torchvision classifier parameters.
//! * [`resnet_model::ResNetTrunk`] - the truncated feature encoder.

pub mod layer_block;
pub mod pretrained;
pub mod residual_block;
pub mod resnet_model;
