//! # EndoFM
//!
//! Endoscopy foundation model: a divided space-time `ViT-B/16`. Still
//! images are encoded as single-frame clips, so the temporal attention
//! sees one token per patch.

use crate::backbone::freeze::{ParamUnit, ParamUnits, TrainabilityMap, freeze_if};
use crate::features::{EncoderOutput, Features};
use crate::layers::attention::{FusedSelfAttention, FusedSelfAttentionConfig};
use crate::layers::pos_embed::resample_positional_grid;
use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use burn::tensor::activation::gelu;

/// Pretraining checkpoints wrap the student network.
pub const PYTORCH_KEY_REMAPS: &[(&str, &str)] = &[(r"^module\.", ""), (r"^backbone\.", "")];

/// [`EndoFm`] Config.
#[derive(Config, Debug)]
pub struct EndoFmConfig {
    /// Pretraining resolution.
    #[config(default = "224")]
    pub img_size: usize,

    /// Patch size.
    #[config(default = "16")]
    pub patch_size: usize,

    /// Embedding dimension.
    #[config(default = "768")]
    pub embed_dim: usize,

    /// Number of blocks.
    #[config(default = "12")]
    pub depth: usize,

    /// Number of attention heads.
    #[config(default = "12")]
    pub num_heads: usize,

    /// Feed-forward expansion.
    #[config(default = "4")]
    pub mlp_ratio: usize,

    /// Frames of the temporal embedding.
    #[config(default = "8")]
    pub num_frames: usize,

    /// Layer norm epsilon.
    #[config(default = "1e-6")]
    pub norm_eps: f64,
}

impl EndoFmConfig {
    fn layer_norm<B: Backend>(
        &self,
        device: &B::Device,
    ) -> LayerNorm<B> {
        LayerNormConfig::new(self.embed_dim)
            .with_epsilon(self.norm_eps)
            .init(device)
    }

    /// Initialize an [`EndoFm`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> EndoFm<B> {
        let dim = self.embed_dim;
        let grid = self.img_size / self.patch_size;
        let hidden = dim * self.mlp_ratio;
        let normal = Distribution::Normal(0.0, 0.02);
        let attention = || FusedSelfAttentionConfig::new(dim, self.num_heads).init(device);

        EndoFm {
            patch_embed: PatchEmbed {
                proj: Conv2dConfig::new([3, dim], [self.patch_size, self.patch_size])
                    .with_stride([self.patch_size, self.patch_size])
                    .init(device),
            },
            cls_token: Param::from_tensor(Tensor::random([1, 1, dim], normal, device)),
            pos_embed: Param::from_tensor(Tensor::random(
                [1, 1 + grid * grid, dim],
                normal,
                device,
            )),
            time_embed: Param::from_tensor(Tensor::zeros([1, self.num_frames, dim], device)),
            blocks: (0..self.depth)
                .map(|_| EndoFmBlock {
                    norm1: self.layer_norm(device),
                    attn: attention(),
                    temporal_norm1: self.layer_norm(device),
                    temporal_attn: attention(),
                    temporal_fc: LinearConfig::new(dim, dim).init(device),
                    norm2: self.layer_norm(device),
                    mlp: Mlp {
                        fc1: LinearConfig::new(dim, hidden).init(device),
                        fc2: LinearConfig::new(hidden, dim).init(device),
                    },
                })
                .collect(),
            norm: self.layer_norm(device),
        }
    }
}

/// Patch projection.
#[derive(Module, Debug)]
pub struct PatchEmbed<B: Backend> {
    /// Strided conv.
    pub proj: Conv2d<B>,
}

/// Feed-forward.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    /// Expansion.
    pub fc1: Linear<B>,
    /// Projection.
    pub fc2: Linear<B>,
}

impl<B: Backend> Mlp<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        self.fc2.forward(gelu(self.fc1.forward(input)))
    }
}

/// Divided space-time block.
#[derive(Module, Debug)]
pub struct EndoFmBlock<B: Backend> {
    /// Spatial attention input norm.
    pub norm1: LayerNorm<B>,
    /// Spatial attention.
    pub attn: FusedSelfAttention<B>,
    /// Temporal attention input norm.
    pub temporal_norm1: LayerNorm<B>,
    /// Temporal attention.
    pub temporal_attn: FusedSelfAttention<B>,
    /// Temporal output projection.
    pub temporal_fc: Linear<B>,
    /// Feed-forward input norm.
    pub norm2: LayerNorm<B>,
    /// Feed-forward.
    pub mlp: Mlp<B>,
}

impl<B: Backend> EndoFmBlock<B> {
    /// ``[batch, 1 + tokens, dim] -> [batch, 1 + tokens, dim]``
    ///
    /// Temporal attention runs per patch over the clip's frames, and leaves
    /// the class token alone.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let [batch, seq, dim] = input.dims();
        let tokens = seq - 1;

        let cls = input.clone().narrow(1, 0, 1);
        let patches = input.narrow(1, 1, tokens);

        let frames = patches.clone().reshape([batch * tokens, 1, dim]);
        let frames = self
            .temporal_attn
            .forward(self.temporal_norm1.forward(frames));
        let patches = patches + self.temporal_fc.forward(frames).reshape([batch, tokens, dim]);

        let x = Tensor::cat(vec![cls, patches], 1);
        let x = x.clone() + self.attn.forward(self.norm1.forward(x));
        x.clone() + self.mlp.forward(self.norm2.forward(x))
    }
}

/// EndoFM encoder.
#[derive(Module, Debug)]
pub struct EndoFm<B: Backend> {
    /// Patch projection.
    pub patch_embed: PatchEmbed<B>,
    /// ``[1, 1, dim]``.
    pub cls_token: Param<Tensor<B, 3>>,
    /// ``[1, 1 + grid^2, dim]``.
    pub pos_embed: Param<Tensor<B, 3>>,
    /// ``[1, frames, dim]``.
    pub time_embed: Param<Tensor<B, 3>>,
    /// Blocks.
    pub blocks: Vec<EndoFmBlock<B>>,
    /// Final norm.
    pub norm: LayerNorm<B>,
}

impl<B: Backend> EndoFm<B> {
    /// Embedding dimension.
    pub fn embed_dim(&self) -> usize {
        self.cls_token.dims()[2]
    }

    /// Forward Pass.
    ///
    /// Returns the class token as the global descriptor and the
    /// patch tokens as features.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> EncoderOutput<B> {
        let [batch] = unpack_shape_contract!(
            ["batch", "rgb", "height", "width"],
            &input,
            &["batch"],
            &[("rgb", 3)]
        );

        let x = self.patch_embed.proj.forward(input);
        let [_, dim, h, w] = x.dims();
        let tokens = h * w;
        let patches = x.flatten::<3>(2, 3).swap_dims(1, 2);

        let pos = self.pos_embed.val();
        let stored = pos.dims()[1] - 1;
        let side = (stored as f64).sqrt().round() as usize;
        let grid = resample_positional_grid(pos.clone().narrow(1, 1, stored), [side, side], [h, w]);

        let cls = self.cls_token.val().repeat_dim(0, batch) + pos.narrow(1, 0, 1);
        let patches = patches + grid + self.time_embed.val().narrow(1, 0, 1);

        let x = Tensor::cat(vec![cls, patches], 1);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let x = self.norm.forward(x);

        let global = x.clone().narrow(1, 0, 1).reshape([batch, dim]);
        EncoderOutput {
            global: Some(global),
            features: Features::Tokens(x.narrow(1, 1, tokens)),
        }
    }
}

impl<B: Backend> ParamUnits for EndoFm<B> {
    fn param_units(&self) -> Vec<ParamUnit> {
        let mut units = vec![
            ParamUnit::new("patch_embed", self.patch_embed.num_params()),
            ParamUnit::new("cls_token", self.cls_token.num_params()),
            ParamUnit::new("pos_embed", self.pos_embed.num_params()),
            ParamUnit::new("time_embed", self.time_embed.num_params()),
        ];
        units.extend(
            self.blocks
                .iter()
                .enumerate()
                .map(|(idx, block)| {
                    ParamUnit::block(format!("blocks.{idx}"), idx, block.num_params())
                }),
        );
        units.push(ParamUnit::new("norm", self.norm.num_params()));
        units
    }

    fn apply_trainability(
        self,
        map: &TrainabilityMap,
    ) -> Self {
        Self {
            patch_embed: freeze_if(self.patch_embed, map.is_frozen("patch_embed")),
            cls_token: freeze_if(self.cls_token, map.is_frozen("cls_token")),
            pos_embed: freeze_if(self.pos_embed, map.is_frozen("pos_embed")),
            time_embed: freeze_if(self.time_embed, map.is_frozen("time_embed")),
            blocks: self
                .blocks
                .into_iter()
                .enumerate()
                .map(|(idx, block)| freeze_if(block, map.is_frozen(&format!("blocks.{idx}"))))
                .collect(),
            norm: freeze_if(self.norm, map.is_frozen("norm")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::freeze::FreezePolicy;
    use burn::backend::{Autodiff, NdArray};

    type B = NdArray<f32>;

    fn tiny() -> EndoFmConfig {
        EndoFmConfig::new()
            .with_img_size(32)
            .with_patch_size(8)
            .with_embed_dim(8)
            .with_depth(3)
            .with_num_heads(2)
            .with_num_frames(2)
    }

    #[test]
    fn test_forward() {
        let device = Default::default();
        let model: EndoFm<B> = tiny().init(&device);
        assert_eq!(model.embed_dim(), 8);

        let output = model.forward(Tensor::random([2, 3, 32, 32], Distribution::Default, &device));
        assert_eq!(output.global.unwrap().dims(), [2, 8]);
        match output.features {
            Features::Tokens(tokens) => assert_eq!(tokens.dims(), [2, 16, 8]),
            _ => unreachable!(),
        }

        let output = model.forward(Tensor::ones([1, 3, 48, 32], &device));
        assert_eq!(output.features.channels(), 8);
    }

    #[test]
    fn test_trailing_blocks_trainable() {
        type A = Autodiff<B>;
        let device = Default::default();
        let model: EndoFm<A> = tiny().init(&device);

        let map = FreezePolicy::TrailingBlocks(2)
            .resolve(model.param_units())
            .unwrap();
        assert_eq!(
            map.block_trainability(),
            vec![(0, false), (1, true), (2, true)]
        );

        let model = model.apply_trainability(&map);
        assert!(!model.blocks[0].attn.qkv.weight.val().is_require_grad());
        assert!(model.blocks[1].temporal_fc.weight.val().is_require_grad());
        assert!(model.blocks[2].mlp.fc2.weight.val().is_require_grad());
        assert!(model.patch_embed.proj.weight.val().is_require_grad());
    }
}
