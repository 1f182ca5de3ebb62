//! # torchvision `ResNet` Checkpoints
//!
//! torchvision names the blocks of ``layer{i}`` by position and the
//! shortcut projection as a ``Sequential``; these remaps rewrite them onto
//! the [`super::resnet_model::ResNet`] field layout.

/// PyTorch state-dictionary key remaps, applied in order.
pub const PYTORCH_KEY_REMAPS: &[(&str, &str)] = &[
    (r"^layer([1-4])\.([0-9]+)\.", "layer$1.blocks.$2."),
    (r"\.downsample\.0\.", ".downsample.conv."),
    (r"\.downsample\.1\.", ".downsample.bn."),
];
